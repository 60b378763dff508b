//! Text rendering of errors, alterations and runs for the shell.

use anyhow::{Context, bail};
use flayer_core::{AlterationTracker, ErrorCollection, ErrorEvent, Frame, RunHistory};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

fn top_frame_columns(error: &ErrorEvent) -> (String, String, String) {
    match error.top_frame() {
        Some(frame) => (
            frame.instruction_pointer.clone(),
            frame.function_name.clone(),
            frame.location(),
        ),
        None => (String::new(), String::new(), String::new()),
    }
}

/// Errors grouped by kind, one line each with the innermost frame.
pub fn write_summary(out: &mut dyn Write, errors: &ErrorCollection) -> io::Result<()> {
    if errors.is_empty() {
        return writeln!(out, "No errors recorded.");
    }
    for (kind, group) in errors.by_kind() {
        writeln!(out, "==> {kind}")?;
        writeln!(out, " id    frame information")?;
        for error in group {
            let (ip, function, location) = top_frame_columns(error);
            writeln!(out, "{:<5}  {:<15} {} {}", error.unique, ip, function, location)?;
        }
    }
    Ok(())
}

pub fn write_details(out: &mut dyn Write, error: &ErrorEvent) -> io::Result<()> {
    writeln!(out, "Error {}:", error.unique)?;
    writeln!(out, "- Thread Id: {}", error.tid)?;
    writeln!(out, "- Kind: {}", error.kind)?;
    writeln!(out, "- What: {}", error.what)?;
    writeln!(out, "- Count: {}", error.count)?;
    if !error.has_debug_frames() {
        return writeln!(out, "- Frames: none");
    }
    writeln!(out, "- Frames:")?;
    for (index, frame) in error.frames.iter().enumerate() {
        let file = frame
            .source_path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        writeln!(out, "  Frame {index}:")?;
        writeln!(out, "  - Instruction pointer: {}", frame.instruction_pointer)?;
        writeln!(out, "  - Object: {}", frame.obj)?;
        writeln!(out, "  - Function: {}", frame.function_name)?;
        writeln!(out, "  - File: {file}")?;
        writeln!(out, "  - Line number: {}", frame.line)?;
    }
    Ok(())
}

/// Source lines around `frame`'s line: `range` lines before it and
/// `range - 1` after it. The frame's own line is marked with `|`.
pub fn write_snippet(out: &mut dyn Write, frame: &Frame, range: usize) -> anyhow::Result<()> {
    if range < 1 {
        bail!("Range must be positive");
    }
    let Some(path) = frame.source_path() else {
        bail!("Frame has no source file information");
    };
    let Some(target_line) = frame.line_number() else {
        bail!("Frame line '{}' is not a line number", frame.line);
    };
    let file = File::open(&path)
        .with_context(|| format!("Cannot open referenced file: {}", path.display()))?;

    let first = target_line.saturating_sub(range).max(1);
    let last = target_line + range - 1;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let number = index + 1;
        if number < first {
            continue;
        }
        if number > last {
            break;
        }
        let line = line.with_context(|| format!("Failed reading {}", path.display()))?;
        let marker = if number == target_line { '|' } else { ' ' };
        writeln!(out, "{marker}{line}")?;
    }
    Ok(())
}

pub fn write_alterations(out: &mut dyn Write, tracker: &AlterationTracker) -> io::Result<()> {
    writeln!(out, "address    action   frame information")?;
    for (address, action, origin) in tracker.entries() {
        let (function, location) = match origin.and_then(ErrorEvent::top_frame) {
            Some(frame) => (frame.function_name.clone(), frame.location()),
            None => ("unknown".to_string(), String::new()),
        };
        writeln!(out, "{address:<7}   {action:<6}  {function} {location}")?;
    }
    Ok(())
}

pub fn write_error_list(out: &mut dyn Write, errors: &[ErrorEvent]) -> io::Result<()> {
    if errors.is_empty() {
        return writeln!(out, "No differences.");
    }
    for error in errors {
        writeln!(out, "{error}")?;
        if let Some(frame) = error.top_frame() {
            writeln!(out, "    at {frame}")?;
        }
    }
    Ok(())
}

pub fn write_history(out: &mut dyn Write, history: &RunHistory) -> io::Result<()> {
    if history.is_empty() {
        return writeln!(out, "No past runs.");
    }
    for (index, run) in history.iter().enumerate() {
        let kinds = run
            .by_kind()
            .into_iter()
            .map(|(kind, group)| format!("{kind}: {}", group.len()))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "Run {index}: {} errors ({kinds})", run.len())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flayer_core::{BranchAction, CountPair};

    fn frame(dir: &str, file: &str, line: &str) -> Frame {
        Frame {
            instruction_pointer: "0x4005D4".to_string(),
            obj: "/usr/bin/target".to_string(),
            function_name: "check".to_string(),
            dir: dir.to_string(),
            file: file.to_string(),
            line: line.to_string(),
        }
    }

    fn error(unique: &str, kind: &str, frames: Vec<Frame>) -> ErrorEvent {
        ErrorEvent {
            unique: unique.to_string(),
            tid: "1".to_string(),
            kind: kind.to_string(),
            what: "Conditional jump depends on tainted data".to_string(),
            frames,
            count: 0,
        }
    }

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn summary_groups_by_kind() {
        let errors = ErrorCollection::reconcile(
            vec![
                error("0x1", "TaintedCondition", vec![frame("/src", "a.c", "3")]),
                error("0x2", "SyscallParam", vec![]),
            ],
            &[CountPair {
                unique: "0x1".to_string(),
                count: "2".to_string(),
            }],
        );
        let text = render(|out| write_summary(out, &errors));
        assert!(text.contains("==> TaintedCondition"));
        assert!(text.contains("==> SyscallParam"));
        assert!(text.contains("0x1    0x4005D4        check /src/a.c:3"));
    }

    #[test]
    fn details_list_every_frame() {
        let e = error(
            "0x1",
            "TaintedCondition",
            vec![frame("/src", "a.c", "3"), frame("/src", "b.c", "9")],
        );
        let text = render(|out| write_details(out, &e));
        assert!(text.contains("Frame 1:"));
        assert!(text.contains("- File: /src/b.c"));

        let bare = error("0x2", "TaintedCondition", vec![]);
        assert!(render(|out| write_details(out, &bare)).contains("- Frames: none"));
    }

    #[test]
    fn snippet_marks_the_faulting_line() {
        let dir = tempfile::tempdir().unwrap();
        let source: String = (1..=20).map(|n| format!("line {n}\n")).collect();
        std::fs::write(dir.path().join("t.c"), source).unwrap();
        let f = frame(&dir.path().display().to_string(), "t.c", "10");

        let mut out = Vec::new();
        write_snippet(&mut out, &f, 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, " line 8\n line 9\n|line 10\n line 11\n");
    }

    #[test]
    fn snippet_rejects_bad_input() {
        let mut out = Vec::new();
        let f = frame("/nonexistent-dir", "t.c", "10");
        assert!(write_snippet(&mut out, &f, 0).is_err());
        assert!(write_snippet(&mut out, &f, 3).is_err());
        assert!(write_snippet(&mut out, &frame("/src", "t.c", "abc"), 3).is_err());
    }

    #[test]
    fn alterations_show_origin_frame() {
        let mut tracker = AlterationTracker::new();
        let e = error("0x1", "TaintedCondition", vec![frame("/src", "a.c", "3")]);
        tracker.alter_error(&e, Some(BranchAction::Follow)).unwrap();
        tracker
            .alter_address("0x8048000", Some(BranchAction::Skip), None)
            .unwrap();
        let text = render(|out| write_alterations(out, &tracker));
        assert!(text.contains("0x4005D4   1       check /src/a.c:3"));
        assert!(text.contains("0x8048000   0       unknown"));
    }

    #[test]
    fn empty_lists_say_so() {
        assert_eq!(render(|out| write_error_list(out, &[])), "No differences.\n");
        assert_eq!(
            render(|out| write_history(out, &RunHistory::new())),
            "No past runs.\n"
        );
        assert_eq!(
            render(|out| write_summary(out, &ErrorCollection::new())),
            "No errors recorded.\n"
        );
    }
}
