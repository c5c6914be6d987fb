//! LCOV coverage reports

use crate::coverage::MergeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Hit counts for one source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Line number to execution count
    pub lines: BTreeMap<u32, u64>,

    /// Function name to (start line, execution count)
    pub functions: BTreeMap<String, (u32, u64)>,
}

impl FileCoverage {
    pub fn lines_hit(&self) -> usize {
        self.lines.values().filter(|hits| **hits > 0).count()
    }

    pub fn functions_hit(&self) -> usize {
        self.functions.values().filter(|(_, hits)| *hits > 0).count()
    }
}

/// A coverage report keyed by source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub files: BTreeMap<String, FileCoverage>,
}

/// Totals over a whole report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub files: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
    pub functions_found: usize,
    pub functions_hit: usize,
}

impl CoverageSummary {
    /// Line coverage in percent; 0 when there are no instrumented lines
    pub fn line_percent(&self) -> f64 {
        if self.lines_found == 0 {
            return 0.0;
        }
        self.lines_hit as f64 * 100.0 / self.lines_found as f64
    }
}

impl CoverageReport {
    /// Parse LCOV tracefile text.
    ///
    /// Summary records (`LF`, `LH`, `FNF`, `FNH`) and branch data are
    /// ignored; totals are recomputed from line and function data.
    pub fn parse_lcov(input: &str) -> Result<Self, MergeError> {
        let mut report = CoverageReport::default();
        let mut current: Option<(String, FileCoverage)> = None;

        for (index, raw) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let parse_error = |message: &str| MergeError::Parse {
                line: line_no,
                message: message.to_string(),
            };

            if line == "end_of_record" {
                let (path, file) = current.take().ok_or_else(|| parse_error("end_of_record without SF"))?;
                report.merge_file(path, file);
                continue;
            }

            let (tag, value) = line.split_once(':').unwrap_or((line, ""));
            match tag {
                "SF" => {
                    if let Some((path, file)) = current.take() {
                        report.merge_file(path, file);
                    }
                    current = Some((value.to_string(), FileCoverage::default()));
                }
                "DA" => {
                    let (_, file) = current.as_mut().ok_or_else(|| parse_error("DA outside of a file record"))?;
                    let mut fields = value.split(',');
                    let line_number = fields
                        .next()
                        .and_then(|f| f.parse::<u32>().ok())
                        .ok_or_else(|| parse_error("invalid DA line number"))?;
                    let hits = fields
                        .next()
                        .and_then(|f| f.parse::<u64>().ok())
                        .ok_or_else(|| parse_error("invalid DA hit count"))?;
                    let total = file.lines.entry(line_number).or_insert(0);
                    *total = total.saturating_add(hits);
                }
                "FN" => {
                    let (_, file) = current.as_mut().ok_or_else(|| parse_error("FN outside of a file record"))?;
                    let (start, name) = value.split_once(',').ok_or_else(|| parse_error("invalid FN record"))?;
                    let start = start.parse::<u32>().map_err(|_| parse_error("invalid FN line number"))?;
                    file.functions.entry(name.to_string()).or_insert((start, 0)).0 = start;
                }
                "FNDA" => {
                    let (_, file) = current.as_mut().ok_or_else(|| parse_error("FNDA outside of a file record"))?;
                    let (hits, name) = value.split_once(',').ok_or_else(|| parse_error("invalid FNDA record"))?;
                    let hits = hits.parse::<u64>().map_err(|_| parse_error("invalid FNDA hit count"))?;
                    let entry = file.functions.entry(name.to_string()).or_insert((0, 0));
                    entry.1 = entry.1.saturating_add(hits);
                }
                "TN" | "LF" | "LH" | "FNF" | "FNH" | "BRDA" | "BRF" | "BRH" => {}
                _ => return Err(parse_error(&format!("unknown record '{}'", tag))),
            }
        }

        if let Some((path, file)) = current.take() {
            report.merge_file(path, file);
        }

        Ok(report)
    }

    fn merge_file(&mut self, path: String, incoming: FileCoverage) {
        let file = self.files.entry(path).or_default();
        for (line, hits) in incoming.lines {
            let total = file.lines.entry(line).or_insert(0);
            *total = total.saturating_add(hits);
        }
        for (name, (start, hits)) in incoming.functions {
            let entry = file.functions.entry(name).or_insert((start, 0));
            entry.1 = entry.1.saturating_add(hits);
        }
    }

    /// Merge another report into this one, summing hit counts
    pub fn merge(&mut self, other: CoverageReport) {
        for (path, file) in other.files {
            self.merge_file(path, file);
        }
    }

    /// Parse and merge several LCOV texts
    pub fn merge_all<'a, I>(reports: I) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut merged = CoverageReport::default();
        let mut count = 0;
        for text in reports {
            merged.merge(Self::parse_lcov(text)?);
            count += 1;
        }
        if count == 0 {
            return Err(MergeError::NoReports);
        }
        Ok(merged)
    }

    pub fn summary(&self) -> CoverageSummary {
        CoverageSummary {
            files: self.files.len(),
            lines_found: self.files.values().map(|f| f.lines.len()).sum(),
            lines_hit: self.files.values().map(|f| f.lines_hit()).sum(),
            functions_found: self.files.values().map(|f| f.functions.len()).sum(),
            functions_hit: self.files.values().map(|f| f.functions_hit()).sum(),
        }
    }

    /// Render back to LCOV text
    pub fn to_lcov(&self) -> String {
        let mut out = String::new();
        for (path, file) in &self.files {
            let _ = writeln!(out, "SF:{}", path);
            for (name, (start, _)) in &file.functions {
                let _ = writeln!(out, "FN:{},{}", start, name);
            }
            for (name, (_, hits)) in &file.functions {
                let _ = writeln!(out, "FNDA:{},{}", hits, name);
            }
            if !file.functions.is_empty() {
                let _ = writeln!(out, "FNF:{}", file.functions.len());
                let _ = writeln!(out, "FNH:{}", file.functions_hit());
            }
            for (line, hits) in &file.lines {
                let _ = writeln!(out, "DA:{},{}", line, hits);
            }
            let _ = writeln!(out, "LF:{}", file.lines.len());
            let _ = writeln!(out, "LH:{}", file.lines_hit());
            out.push_str("end_of_record\n");
        }
        out
    }
}
