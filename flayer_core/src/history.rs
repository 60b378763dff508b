use crate::collection::ErrorCollection;
use crate::record::ErrorEvent;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Run {index} does not exist ({len} runs recorded)")]
    NoSuchRun { index: usize, len: usize },
}

/// Error collections of past runs, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    runs: Vec<ErrorCollection>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a run and returns its index.
    pub fn push(&mut self, errors: ErrorCollection) -> usize {
        self.runs.push(errors);
        self.runs.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<&ErrorCollection, HistoryError> {
        self.runs.get(index).ok_or(HistoryError::NoSuchRun {
            index,
            len: self.runs.len(),
        })
    }

    pub fn latest(&self) -> Option<&ErrorCollection> {
        self.runs.last()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorCollection> {
        self.runs.iter()
    }

    /// Errors of `run_b` that did not occur, identically, in `run_a`.
    pub fn error_diff(&self, run_a: usize, run_b: usize) -> Result<Vec<ErrorEvent>, HistoryError> {
        let a = self.get(run_a)?;
        let b = self.get(run_b)?;
        Ok(a.diff(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(ids: &[&str]) -> ErrorCollection {
        let errors = ids
            .iter()
            .map(|id| ErrorEvent {
                unique: id.to_string(),
                kind: "TaintedCondition".to_string(),
                ..Default::default()
            })
            .collect();
        ErrorCollection::reconcile(errors, &[])
    }

    #[test]
    fn error_diff_between_runs() {
        let mut history = RunHistory::new();
        assert_eq!(history.push(collection(&["0x1", "0x2"])), 0);
        assert_eq!(history.push(collection(&["0x1", "0x3"])), 1);

        let new_in_second = history.error_diff(0, 1).unwrap();
        assert_eq!(new_in_second.len(), 1);
        assert_eq!(new_in_second[0].unique, "0x3");
        assert!(history.error_diff(1, 1).unwrap().is_empty());
        assert_eq!(history.latest().map(|c| c.len()), Some(2));
    }

    #[test]
    fn missing_run_is_an_error() {
        let mut history = RunHistory::new();
        history.push(collection(&["0x1"]));
        assert_eq!(
            history.error_diff(0, 4),
            Err(HistoryError::NoSuchRun { index: 4, len: 1 })
        );
        history.clear();
        assert!(history.is_empty());
    }
}
