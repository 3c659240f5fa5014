//! Registered-but-unimplemented classifiers.
//!
//! Prefetch and Shellbags need binary/registry decoding that is not
//! built yet. They still claim their files so the pipeline counts them
//! as skipped instead of mislabeling them through the line-log
//! fallback.

use std::path::Path;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::traits::{base_name_lower, extension_lower, EventParser, ParseError};

pub struct PrefetchParser;

impl EventParser for PrefetchParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        extension_lower(path) == "pf"
    }

    fn parse(&self, _path: &Path, _cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        Err(ParseError::Unsupported(
            "prefetch file parsing requires specialized binary decoding".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "prefetch"
    }
}

pub struct ShellbagParser;

impl EventParser for ShellbagParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        base_name_lower(path).contains("shellbag")
    }

    fn parse(&self, _path: &Path, _cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        Err(ParseError::Unsupported(
            "shellbag parsing requires Windows registry decoding".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "shellbag"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefetch_claims_pf_and_refuses_to_parse() {
        let cache = HeaderCache::new();
        assert!(PrefetchParser.can_parse(Path::new("CALC.EXE-1A2B3C4D.pf"), &cache));
        let result = PrefetchParser.parse(Path::new("x.pf"), &CancelToken::new());
        assert!(matches!(result, Err(ParseError::Unsupported(_))));
    }

    #[test]
    fn test_shellbag_claims_by_name() {
        let cache = HeaderCache::new();
        assert!(ShellbagParser.can_parse(Path::new("shellbags_export.csv"), &cache));
        assert!(!ShellbagParser.can_parse(Path::new("bags.csv"), &cache));
        let result = ShellbagParser.parse(Path::new("shellbags.reg"), &CancelToken::new());
        assert!(matches!(result, Err(ParseError::Unsupported(_))));
    }
}
