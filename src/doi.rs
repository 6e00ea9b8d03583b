use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::WorkflowError;

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d{4,9}/[-._;()/:A-Za-z0-9<>\[\]]+$").unwrap());

const PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Strips resolver prefixes and checks the `10.<registrant>/<suffix>` syntax.
pub fn parse_doi(input: &str) -> Result<String, WorkflowError> {
    let mut doi = input.trim();
    if doi.is_empty() {
        return Err(WorkflowError::MissingArgument("doi"));
    }

    for prefix in PREFIXES {
        let matches = doi
            .get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix));
        if matches {
            doi = doi[prefix.len()..].trim_start();
            break;
        }
    }

    if DOI_RE.is_match(doi) {
        Ok(doi.to_string())
    } else {
        Err(WorkflowError::InvalidDoi(input.trim().to_string()))
    }
}
