//! Heuristic computation of the AUTO-mode gate's three signals (spec §4.7)
//! from a scout claim and the query text. The core does not prescribe a
//! specific NLI/retrieval model (those are external collaborators per spec
//! §1); these are the coarse, dependency-free heuristics the core itself
//! can compute over whatever evidence the scout attached.

use crate::domain::Claim;
use crate::services::GateSignals;
use std::collections::HashSet;

fn keywords(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// `retrieval_overlap`: Jaccard of the scout's source-evidence keywords
/// against the query's keywords.
pub fn retrieval_overlap(query_text: &str, scout: &Claim) -> f64 {
    let query_keywords = keywords(query_text);
    let evidence_keywords: HashSet<String> = scout
        .sources
        .iter()
        .flat_map(|s| keywords(&s.snippet))
        .collect();
    jaccard(&query_keywords, &evidence_keywords)
}

/// `nli_conflict`: proportion of the scout's sources flagged as
/// contradicting its claim.
pub fn nli_conflict(scout: &Claim) -> f64 {
    if scout.sources.is_empty() {
        return 0.0;
    }
    let conflicting = scout.sources.iter().filter(|s| s.conflicts).count() as f64;
    conflicting / scout.sources.len() as f64
}

/// `complexity`: heuristic over query length and punctuation density, as a
/// stand-in for "length/structure/named entities" (spec §4.7).
pub fn complexity(query_text: &str) -> f64 {
    let word_count = query_text.split_whitespace().count() as f64;
    let question_marks = query_text.matches('?').count() as f64;
    let length_score = (word_count / 40.0).min(1.0);
    let structure_score = (question_marks / 3.0).min(1.0);
    (length_score * 0.7 + structure_score * 0.3).min(1.0)
}

pub fn compute(query_text: &str, scout: &Claim) -> GateSignals {
    GateSignals {
        retrieval_overlap: retrieval_overlap(query_text, scout),
        nli_conflict: nli_conflict(scout),
        complexity: complexity(query_text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClaimType;

    #[test]
    fn no_evidence_means_zero_overlap() {
        let scout = Claim::new("s1", ClaimType::Synthesis, "answer", "synthesis");
        assert_eq!(retrieval_overlap("what is rust ownership", &scout), 0.0);
    }

    #[test]
    fn complexity_grows_with_length_and_questions() {
        let short = complexity("hi");
        let long = complexity(&"word ".repeat(50).trim().to_string());
        assert!(long > short);
    }

    #[test]
    fn conflict_ratio_reflects_flagged_sources() {
        use crate::domain::Source;
        let mut scout = Claim::new("s1", ClaimType::Synthesis, "answer", "synthesis");
        scout.sources = vec![
            Source { url: "a".into(), snippet: "x".into(), metadata: Default::default(), conflicts: true },
            Source { url: "b".into(), snippet: "y".into(), metadata: Default::default(), conflicts: false },
        ];
        assert_eq!(nli_conflict(&scout), 0.5);
    }
}
