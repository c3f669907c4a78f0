// ==============================================================================
// validator.rs - Input File Validation
// ==============================================================================
// Description: Validates raw genome files before parsing (size, type, magic)
// Author: Matt Barham
// Created: 2026-02-11
// Modified: 2026-05-14
// Version: 1.1.0
// Security: Allowlist-only file types, magic number verification
// ==============================================================================

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024; // 500 MB

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub original_name: String,
    pub safe_name: String,
    pub extension: String,
    pub size: u64,
    pub hash_sha256: String,
    pub validated_at: chrono::DateTime<chrono::Utc>,
}

pub struct FileValidator {
    max_file_size: u64,
    /// Extension -> expected magic bytes (empty = plain text)
    allowed_types: HashMap<String, Vec<u8>>,
}

impl FileValidator {
    pub fn new() -> Self {
        let mut allowed_types = HashMap::new();

        // Plain-text raw data exports (23andMe, LivingDNA)
        allowed_types.insert("txt".to_string(), vec![]);
        // AncestryDNA / FamilyTreeDNA / MyHeritage CSV exports
        allowed_types.insert("csv".to_string(), vec![]);
        allowed_types.insert("tsv".to_string(), vec![]);
        // VCF exports, plain and gzipped
        allowed_types.insert("vcf".to_string(), vec![]);
        allowed_types.insert("vcf.gz".to_string(), GZIP_MAGIC.to_vec());
        allowed_types.insert("txt.gz".to_string(), GZIP_MAGIC.to_vec());
        allowed_types.insert("csv.gz".to_string(), GZIP_MAGIC.to_vec());

        Self {
            max_file_size: MAX_FILE_SIZE,
            allowed_types,
        }
    }

    /// Validate a raw genome file before it enters the pipeline
    pub fn validate(&self, file_path: &Path) -> Result<ValidatedFile> {
        let file_name = file_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid file path"))?
            .to_string_lossy()
            .to_string();

        info!("Validating file: {}", file_name);

        // 1. Size check
        let metadata = std::fs::metadata(file_path).context("Failed to get file metadata")?;
        let size = metadata.len();
        if size > self.max_file_size {
            anyhow::bail!(
                "File too large: {} bytes (max: {} bytes)",
                size,
                self.max_file_size
            );
        }
        debug!("Size check passed: {} bytes", size);

        // 2. Filename sanitization
        let safe_name = self.sanitize_filename(&file_name)?;
        debug!("Sanitized filename: {}", safe_name);

        // 3. Extension check (allowlist)
        let extension = self.get_extension(&safe_name)?;
        if !self.allowed_types.contains_key(&extension) {
            anyhow::bail!("Invalid file type: {}", extension);
        }
        debug!("Extension check passed: {}", extension);

        // 4. Magic number verification
        if let Some(expected_magic) = self.allowed_types.get(&extension) {
            if !expected_magic.is_empty() {
                let actual_magic = self.read_magic_number(file_path)?;
                if !actual_magic.starts_with(expected_magic) {
                    anyhow::bail!("Magic number mismatch for .{} file", extension);
                }
                debug!("Magic number check passed");
            }
        }

        // 5. Compute SHA-256 digest
        let hash = self.compute_sha256(file_path)?;
        debug!("SHA-256: {}", hash);

        Ok(ValidatedFile {
            original_name: file_name,
            safe_name,
            extension,
            size,
            hash_sha256: hash,
            validated_at: chrono::Utc::now(),
        })
    }

    fn sanitize_filename(&self, name: &str) -> Result<String> {
        // Remove path separators, null bytes, control characters
        let safe = name
            .replace(['/', '\\', '\0'], "_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
            .collect::<String>();

        let truncated: String = safe.chars().take(255).collect();
        if truncated.is_empty() {
            anyhow::bail!("Invalid filename after sanitization");
        }

        Ok(truncated)
    }

    fn get_extension(&self, filename: &str) -> Result<String> {
        // Handle compound extensions like .vcf.gz
        let lower = filename.to_lowercase();
        for compound in ["vcf.gz", "txt.gz", "csv.gz"] {
            if lower.ends_with(&format!(".{}", compound)) {
                return Ok(compound.to_string());
            }
        }

        lower
            .rsplit('.')
            .next()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("No file extension found"))
    }

    fn read_magic_number(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buffer = vec![0u8; 4];
        let read = file.read(&mut buffer)?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn compute_sha256(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 8192];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new()
    }
}
