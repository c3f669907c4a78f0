// ==============================================================================
// parsers/build_inference.rs - Reference Build Inference
// ==============================================================================
// Description: Infers GRCh36/37/38 from observed marker positions
// Author: Matt Barham
// Created: 2026-02-10
// Modified: 2026-04-02
// Version: 1.0.0
// ==============================================================================

use crate::models::{ReferenceBuild, Snp};
use std::collections::HashMap;

/// Minimum agreement before a build is declared
pub const MIN_BUILD_CONFIDENCE: f64 = 0.8;

/// A well-known marker with its position under each supported build
#[derive(Debug, Clone, Copy)]
pub struct ReferenceMarker {
    pub rsid: &'static str,
    pub chromosome: &'static str,
    pub build36: u64,
    pub build37: u64,
    pub build38: u64,
}

/// Markers chosen for stable rsids that nearly every consumer chip reports.
pub const REFERENCE_MARKERS: &[ReferenceMarker] = &[
    ReferenceMarker {
        rsid: "rs4477212",
        chromosome: "1",
        build36: 72017,
        build37: 82154,
        build38: 817186,
    },
    ReferenceMarker {
        rsid: "rs3094315",
        chromosome: "1",
        build36: 742429,
        build37: 752566,
        build38: 817341,
    },
    ReferenceMarker {
        rsid: "rs3131972",
        chromosome: "1",
        build36: 742584,
        build37: 752721,
        build38: 817496,
    },
    ReferenceMarker {
        rsid: "rs12124819",
        chromosome: "1",
        build36: 766409,
        build37: 776546,
        build38: 841166,
    },
    ReferenceMarker {
        rsid: "rs11240777",
        chromosome: "1",
        build36: 788822,
        build37: 798959,
        build38: 863579,
    },
    ReferenceMarker {
        rsid: "rs4970383",
        chromosome: "1",
        build36: 828418,
        build37: 838555,
        build38: 903175,
    },
    ReferenceMarker {
        rsid: "rs4475691",
        chromosome: "1",
        build36: 836671,
        build37: 846808,
        build38: 911428,
    },
    ReferenceMarker {
        rsid: "rs7537756",
        chromosome: "1",
        build36: 844113,
        build37: 854250,
        build38: 918870,
    },
    ReferenceMarker {
        rsid: "rs13302982",
        chromosome: "1",
        build36: 851671,
        build37: 861808,
        build38: 926428,
    },
    ReferenceMarker {
        rsid: "rs2340592",
        chromosome: "1",
        build36: 918573,
        build37: 928710,
        build38: 993330,
    },
];

/// Outcome of build inference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildInference {
    pub build: ReferenceBuild,
    pub confidence: f64,
    /// Reference markers that were present in the genome
    pub markers_checked: usize,
}

/// Infer the reference build from the parsed variant map. For every reference
/// marker present in the genome, each build whose known position equals the
/// observed position scores a match; confidence is best-build matches over
/// markers checked. Below MIN_BUILD_CONFIDENCE the build stays Unknown.
pub fn infer_build(snps: &HashMap<String, Snp>) -> BuildInference {
    let mut checked = 0usize;
    let mut matches36 = 0usize;
    let mut matches37 = 0usize;
    let mut matches38 = 0usize;

    for marker in REFERENCE_MARKERS {
        let snp = match snps.get(marker.rsid) {
            Some(snp) => snp,
            None => continue,
        };
        checked += 1;

        if snp.position == marker.build36 {
            matches36 += 1;
        }
        if snp.position == marker.build37 {
            matches37 += 1;
        }
        if snp.position == marker.build38 {
            matches38 += 1;
        }
    }

    if checked == 0 {
        return BuildInference {
            build: ReferenceBuild::Unknown,
            confidence: 0.0,
            markers_checked: 0,
        };
    }

    // GRCh37 is by far the most common chip coordinate system, so it wins ties.
    let candidates = [
        (ReferenceBuild::Build37, matches37),
        (ReferenceBuild::Build38, matches38),
        (ReferenceBuild::Build36, matches36),
    ];
    let (best_build, best_matches) = candidates
        .into_iter()
        .max_by_key(|(_, m)| *m)
        .unwrap_or((ReferenceBuild::Unknown, 0));

    let confidence = best_matches as f64 / checked as f64;

    if confidence >= MIN_BUILD_CONFIDENCE {
        BuildInference {
            build: best_build,
            confidence,
            markers_checked: checked,
        }
    } else {
        BuildInference {
            build: ReferenceBuild::Unknown,
            confidence,
            markers_checked: checked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome_with_markers(count: usize, position_of: fn(&ReferenceMarker) -> u64) -> HashMap<String, Snp> {
        REFERENCE_MARKERS
            .iter()
            .take(count)
            .map(|m| {
                (
                    m.rsid.to_string(),
                    Snp::new(
                        m.rsid.to_string(),
                        m.chromosome.to_string(),
                        position_of(m),
                        "AA",
                    ),
                )
            })
            .collect()
    }

    #[test]
    fn test_infer_build37() {
        let snps = genome_with_markers(REFERENCE_MARKERS.len(), |m| m.build37);
        let inference = infer_build(&snps);
        assert_eq!(inference.build, ReferenceBuild::Build37);
        assert_eq!(inference.confidence, 1.0);
        assert_eq!(inference.markers_checked, REFERENCE_MARKERS.len());
    }

    #[test]
    fn test_infer_build38() {
        let snps = genome_with_markers(REFERENCE_MARKERS.len(), |m| m.build38);
        let inference = infer_build(&snps);
        assert_eq!(inference.build, ReferenceBuild::Build38);
        assert_eq!(inference.confidence, 1.0);
    }

    #[test]
    fn test_no_markers_present() {
        let mut snps = HashMap::new();
        snps.insert(
            "rs999999999".to_string(),
            Snp::new("rs999999999".to_string(), "2".to_string(), 5, "AA"),
        );
        let inference = infer_build(&snps);
        assert_eq!(inference.build, ReferenceBuild::Unknown);
        assert_eq!(inference.confidence, 0.0);
        assert_eq!(inference.markers_checked, 0);
    }

    #[test]
    fn test_low_confidence_stays_unknown() {
        // 5 markers at build37 positions, 5 at nonsense positions: 0.5 < 0.8
        let mut snps = genome_with_markers(5, |m| m.build37);
        for m in REFERENCE_MARKERS.iter().skip(5) {
            snps.insert(
                m.rsid.to_string(),
                Snp::new(m.rsid.to_string(), m.chromosome.to_string(), 1, "AA"),
            );
        }
        let inference = infer_build(&snps);
        assert_eq!(inference.build, ReferenceBuild::Unknown);
        assert!((inference.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_monotone_in_matching_markers() {
        let mut previous = 0.0;
        for count in 1..=REFERENCE_MARKERS.len() {
            let snps = genome_with_markers(count, |m| m.build37);
            let inference = infer_build(&snps);
            assert!(inference.confidence >= previous);
            previous = inference.confidence;
        }
    }
}
