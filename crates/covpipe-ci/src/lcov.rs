//! lcov tracefile parsing.
//!
//! Only the records grcov emits are interpreted (`SF`, `FN`, `FNDA`, `DA`,
//! `end_of_record`); totals are recomputed from them rather than trusted
//! from `LF`/`LH`/`FNF`/`FNH`.

use crate::error::{CiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A function listed in the tracefile, with its execution count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCoverage {
    pub name: String,
    pub line: u32,
    pub hits: u64,
}

impl FunctionCoverage {
    pub fn is_covered(&self) -> bool {
        self.hits > 0
    }
}

/// Coverage for a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    pub functions: Vec<FunctionCoverage>,
    pub lines_found: u32,
    pub lines_hit: u32,
}

impl FileCoverage {
    pub fn function(&self, name: &str) -> Option<&FunctionCoverage> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Parsed tracefile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LcovReport {
    pub files: Vec<FileCoverage>,
}

/// Aggregate counts over a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub files: usize,
    pub lines_found: u64,
    pub lines_hit: u64,
    pub functions_found: u64,
    pub functions_hit: u64,
}

impl CoverageSummary {
    pub fn line_percent(&self) -> f64 {
        percent(self.lines_hit, self.lines_found)
    }

    pub fn function_percent(&self) -> f64 {
        percent(self.functions_hit, self.functions_found)
    }
}

fn percent(hit: u64, found: u64) -> f64 {
    if found == 0 {
        0.0
    } else {
        hit as f64 * 100.0 / found as f64
    }
}

impl LcovReport {
    /// Parse lcov text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut files = Vec::new();
        let mut current: Option<FileBuilder> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line == "end_of_record" {
                let builder = current
                    .take()
                    .ok_or_else(|| malformed(line_no, "end_of_record without SF"))?;
                files.push(builder.finish());
                continue;
            }

            let (tag, value) = match line.split_once(':') {
                Some(pair) => pair,
                None => return Err(malformed(line_no, "expected TAG:value")),
            };

            if tag == "SF" {
                if current.is_some() {
                    return Err(malformed(line_no, "SF before end_of_record"));
                }
                current = Some(FileBuilder::new(value));
                continue;
            }

            let Some(file) = current.as_mut() else {
                // TN and friends may precede the first SF.
                continue;
            };

            match tag {
                "FN" => {
                    let (line, name) = value
                        .split_once(',')
                        .ok_or_else(|| malformed(line_no, "FN needs line,name"))?;
                    let line = line
                        .parse()
                        .map_err(|_| malformed(line_no, "FN line is not a number"))?;
                    file.declare_function(name, line);
                }
                "FNDA" => {
                    let (count, name) = value
                        .split_once(',')
                        .ok_or_else(|| malformed(line_no, "FNDA needs count,name"))?;
                    let count = count
                        .parse()
                        .map_err(|_| malformed(line_no, "FNDA count is not a number"))?;
                    file.record_function_hits(name, count);
                }
                "DA" => {
                    let mut parts = value.split(',');
                    let (Some(_line), Some(count)) = (parts.next(), parts.next()) else {
                        return Err(malformed(line_no, "DA needs line,count"));
                    };
                    let count: u64 = count
                        .parse()
                        .map_err(|_| malformed(line_no, "DA count is not a number"))?;
                    file.lines_found += 1;
                    if count > 0 {
                        file.lines_hit += 1;
                    }
                }
                _ => {}
            }
        }

        if current.is_some() {
            return Err(malformed(text.lines().count(), "missing end_of_record"));
        }

        Ok(Self { files })
    }

    pub fn file(&self, path_suffix: &str) -> Option<&FileCoverage> {
        self.files.iter().find(|f| f.path.ends_with(path_suffix))
    }

    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary {
            files: self.files.len(),
            ..Default::default()
        };
        for file in &self.files {
            summary.lines_found += u64::from(file.lines_found);
            summary.lines_hit += u64::from(file.lines_hit);
            summary.functions_found += file.functions.len() as u64;
            summary.functions_hit += file.functions.iter().filter(|f| f.is_covered()).count() as u64;
        }
        summary
    }
}

fn malformed(line: usize, reason: &str) -> CiError {
    CiError::Lcov {
        line,
        reason: reason.to_string(),
    }
}

struct FileBuilder {
    path: String,
    order: Vec<String>,
    functions: HashMap<String, FunctionCoverage>,
    lines_found: u32,
    lines_hit: u32,
}

impl FileBuilder {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            order: Vec::new(),
            functions: HashMap::new(),
            lines_found: 0,
            lines_hit: 0,
        }
    }

    fn entry(&mut self, name: &str) -> &mut FunctionCoverage {
        if !self.functions.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.functions
            .entry(name.to_string())
            .or_insert_with(|| FunctionCoverage {
                name: name.to_string(),
                line: 0,
                hits: 0,
            })
    }

    fn declare_function(&mut self, name: &str, line: u32) {
        self.entry(name).line = line;
    }

    fn record_function_hits(&mut self, name: &str, hits: u64) {
        let entry = self.entry(name);
        entry.hits = entry.hits.saturating_add(hits);
    }

    fn finish(mut self) -> FileCoverage {
        let functions = self
            .order
            .iter()
            .filter_map(|name| self.functions.remove(name))
            .collect();
        FileCoverage {
            path: self.path,
            functions,
            lines_found: self.lines_found,
            lines_hit: self.lines_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // grcov output for a crate with one function reached by its test and
    // one compiled but never called (kept by -Clink-dead-code).
    const REACHABLE_UNREACHABLE: &str = "\
TN:
SF:src/lib.rs
FN:1,_RNvCs1_6sample9reachable
FN:5,_RNvCs1_6sample11unreachable
FNDA:1,_RNvCs1_6sample9reachable
FNDA:0,_RNvCs1_6sample11unreachable
FNF:2
FNH:1
DA:1,1
DA:2,1
DA:3,1
DA:5,0
DA:6,0
DA:7,0
LF:6
LH:3
end_of_record
";

    #[test]
    fn test_unreachable_function_present_but_uncovered() {
        let report = LcovReport::parse(REACHABLE_UNREACHABLE).unwrap();
        let file = report.file("src/lib.rs").expect("file missing");

        let reachable = file.function("_RNvCs1_6sample9reachable").unwrap();
        assert!(reachable.is_covered());

        let unreachable = file
            .function("_RNvCs1_6sample11unreachable")
            .expect("unreachable function must be present");
        assert!(!unreachable.is_covered());
        assert_eq!(unreachable.line, 5);
    }

    #[test]
    fn test_summary() {
        let summary = LcovReport::parse(REACHABLE_UNREACHABLE).unwrap().summary();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.lines_found, 6);
        assert_eq!(summary.lines_hit, 3);
        assert_eq!(summary.functions_found, 2);
        assert_eq!(summary.functions_hit, 1);
        assert!((summary.line_percent() - 50.0).abs() < f64::EPSILON);
        assert!((summary.function_percent() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fnda_without_fn_still_listed() {
        let report = LcovReport::parse("SF:a.rs\nFNDA:3,helper\nend_of_record\n").unwrap();
        let f = report.files[0].function("helper").unwrap();
        assert_eq!(f.hits, 3);
        assert_eq!(f.line, 0);
    }

    #[test]
    fn test_multiple_files_and_checksums() {
        let text = "SF:a.rs\nDA:1,2,abcdef\nend_of_record\nSF:b.rs\nDA:1,0\nend_of_record\n";
        let report = LcovReport::parse(text).unwrap();
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].lines_hit, 1);
        assert_eq!(report.files[1].lines_hit, 0);
        assert_eq!(report.summary().lines_found, 2);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            LcovReport::parse("SF:a.rs\nDA:1,x\nend_of_record\n"),
            Err(CiError::Lcov { line: 2, .. })
        ));
        assert!(LcovReport::parse("SF:a.rs\nDA:1,1\n").is_err());
        assert!(LcovReport::parse("end_of_record\n").is_err());
        assert!(LcovReport::parse("SF:a.rs\nSF:b.rs\n").is_err());
    }

    #[test]
    fn test_empty_report_has_zero_percent() {
        let summary = LcovReport::parse("").unwrap().summary();
        assert_eq!(summary.line_percent(), 0.0);
    }
}
