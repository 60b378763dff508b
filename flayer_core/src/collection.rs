use crate::diff;
use crate::parser::{ErrorLogParser, ParseError, ParseOutcome, ParseWarning};
use crate::record::{CountPair, ErrorEvent};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

/// Parses a unique id such as `0x1f`. Accepts an optional `0x` prefix and
/// surrounding whitespace.
pub fn parse_unique_id(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).ok()
}

/// The errors of one run, keyed by the numeric value of their unique id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorCollection {
    errors: BTreeMap<u64, ErrorEvent>,
}

impl ErrorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the collection from parser output.
    ///
    /// Counts from the error-count section override the count stored on the
    /// error itself. Errors and count pairs whose id does not parse as hex
    /// are left out.
    pub fn reconcile(errors: Vec<ErrorEvent>, counts: &[CountPair]) -> Self {
        let mut count_table: HashMap<u64, u64> = HashMap::new();
        for pair in counts {
            if pair.unique.is_empty() || pair.count.is_empty() {
                continue;
            }
            match (parse_unique_id(&pair.unique), pair.count.trim().parse::<u64>()) {
                (Some(key), Ok(count)) => {
                    count_table.insert(key, count);
                }
                _ => debug!(unique = %pair.unique, count = %pair.count, "Skipping unparsable count pair"),
            }
        }

        let mut collection = Self::new();
        for mut error in errors {
            // TODO: count these drops once run telemetry exists, to tell tool
            // bugs apart from real errors with damaged ids.
            let Some(key) = parse_unique_id(&error.unique) else {
                debug!(unique = %error.unique, "Dropping error with unparsable unique id");
                continue;
            };
            if let Some(count) = count_table.get(&key) {
                error.count = *count;
            }
            collection.errors.insert(key, error);
        }
        collection
    }

    pub fn from_outcome(outcome: ParseOutcome) -> Self {
        Self::reconcile(outcome.errors, &outcome.counts)
    }

    pub fn get(&self, key: u64) -> Option<&ErrorEvent> {
        self.errors.get(&key)
    }

    /// Looks an error up by its textual id (`0x1f`).
    pub fn get_by_unique(&self, unique: &str) -> Option<&ErrorEvent> {
        parse_unique_id(unique).and_then(|key| self.get(key))
    }

    pub fn insert(&mut self, key: u64, error: ErrorEvent) -> Option<ErrorEvent> {
        self.errors.insert(key, error)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.errors.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.errors.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &ErrorEvent)> {
        self.errors.iter().map(|(key, error)| (*key, error))
    }

    pub fn values(&self) -> impl Iterator<Item = &ErrorEvent> {
        self.errors.values()
    }

    pub fn to_vec(&self) -> Vec<ErrorEvent> {
        self.errors.values().cloned().collect()
    }

    /// Groups errors by kind, each group in key order.
    pub fn by_kind(&self) -> BTreeMap<&str, Vec<&ErrorEvent>> {
        let mut kinds: BTreeMap<&str, Vec<&ErrorEvent>> = BTreeMap::new();
        for error in self.errors.values() {
            kinds.entry(error.kind.as_str()).or_default().push(error);
        }
        kinds
    }

    /// Errors of `later` that have no identical counterpart in `self`.
    pub fn diff(&self, later: &ErrorCollection) -> Vec<ErrorEvent> {
        let earlier: Vec<&ErrorEvent> = self.values().collect();
        let later: Vec<&ErrorEvent> = later.values().collect();
        diff::diff(&earlier, &later)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// A reconciled error log plus the recoverable problem met while reading it, if any.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub errors: ErrorCollection,
    pub warning: Option<ParseWarning>,
}

/// Parses and reconciles an error log from `input`.
pub fn read_error_log<R: BufRead>(input: R) -> Result<ParsedLog, ParseError> {
    let mut outcome = ErrorLogParser::new().parse(input)?;
    let warning = outcome.warning.take();
    Ok(ParsedLog {
        errors: ErrorCollection::from_outcome(outcome),
        warning,
    })
}

pub fn read_error_log_file(path: &Path) -> Result<ParsedLog, ParseError> {
    let mut outcome = ErrorLogParser::new().parse_file(path)?;
    let warning = outcome.warning.take();
    Ok(ParsedLog {
        errors: ErrorCollection::from_outcome(outcome),
        warning,
    })
}
