//! Sheet file operations backing the CLI commands.
//!
//! A sheet lives on disk as a JSON snapshot (cells plus labels). Every
//! command loads the snapshot, applies one engine operation, and writes
//! the snapshot back. Command functions return their stdout text so
//! they can be exercised directly in tests.

use std::fmt;
use std::fs;
use std::path::Path;

use gridcalc_config::{RecalcPolicy, Settings};
use gridcalc_engine::batch::OpReport;
use gridcalc_engine::coord::CellCoord;
use gridcalc_engine::engine::{Engine, EvalPolicy, Snapshot};
use gridcalc_engine::error::EngineError;
use gridcalc_engine::formula::Value;
use gridcalc_engine::label::LabelTarget;
use gridcalc_engine::range::Range;

use crate::exit_codes::{EXIT_IO, EXIT_STRUCTURAL, EXIT_USAGE, EXIT_VALIDATION};

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Io(String),
    Engine(EngineError),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => EXIT_USAGE,
            CliError::Io(_) => EXIT_IO,
            CliError::Engine(EngineError::Validation(_)) => EXIT_VALIDATION,
            CliError::Engine(EngineError::Structural(_)) => EXIT_STRUCTURAL,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(msg) => write!(f, "{msg}"),
            CliError::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        CliError::Engine(err)
    }
}

pub fn policy_from(settings: &Settings) -> EvalPolicy {
    match settings.recalc_policy {
        RecalcPolicy::Skip => EvalPolicy::Skip,
        RecalcPolicy::Lazy => EvalPolicy::ComputeIfNecessary,
        RecalcPolicy::Force => EvalPolicy::ForceRecompute,
    }
}

/// Load a sheet file, or start an empty sheet if it does not exist.
pub fn load_engine(path: &Path, policy: EvalPolicy) -> Result<Engine, CliError> {
    if !path.exists() {
        return Ok(Engine::with_policy(policy));
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| CliError::Io(format!("cannot read {}: {}", path.display(), e)))?;
    let snapshot: Snapshot = serde_json::from_str(&contents)
        .map_err(|e| CliError::Io(format!("cannot parse {}: {}", path.display(), e)))?;
    let mut engine = Engine::from_snapshot(snapshot).map_err(EngineError::from)?;
    engine.set_policy(policy);
    Ok(engine)
}

pub fn save_engine(path: &Path, engine: &Engine) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(&engine.to_snapshot())
        .map_err(|e| CliError::Io(format!("cannot serialize sheet: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| CliError::Io(format!("cannot write {}: {}", path.display(), e)))
}

pub fn parse_addr(addr: &str) -> Result<CellCoord, CliError> {
    CellCoord::parse(addr)
        .map_err(|_| CliError::Usage(format!("'{}' is not a cell address", addr)))
}

pub fn parse_range(text: &str) -> Result<Range, CliError> {
    Range::parse(text).map_err(|_| CliError::Usage(format!("'{}' is not a range", text)))
}

/// Parse a column letter like "C" into its zero-based index.
pub fn parse_col(text: &str) -> Result<u32, CliError> {
    CellCoord::parse(&format!("{}1", text))
        .map(|c| c.col)
        .map_err(|_| CliError::Usage(format!("'{}' is not a column", text)))
}

/// Parse a one-based row number into its zero-based index.
pub fn parse_row(text: &str) -> Result<u32, CliError> {
    match text.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(CliError::Usage(format!("'{}' is not a row number", text))),
    }
}

fn report_line(report: &OpReport, settings: &Settings) -> String {
    if settings.log_reports {
        format!("{}\n", report.log_line())
    } else {
        String::new()
    }
}

fn display_value(engine: &mut Engine, coord: CellCoord, settings: &Settings) -> String {
    if let (Some(p), Ok(Value::Number(n))) = (settings.precision, engine.value_of(coord)) {
        return format!("{:.*}", p as usize, n);
    }
    engine.rendered(coord)
}

// =============================================================================
// Commands
// =============================================================================

pub fn cmd_get(file: &Path, addr: &str, settings: &Settings) -> Result<String, CliError> {
    let coord = parse_addr(addr)?;
    let mut engine = load_engine(file, policy_from(settings))?;
    let out = display_value(&mut engine, coord, settings);
    // Computing may have filled caches worth persisting
    if file.exists() {
        save_engine(file, &engine)?;
    }
    Ok(format!("{}\n", out))
}

pub fn cmd_set(
    file: &Path,
    addr: &str,
    input: &str,
    settings: &Settings,
) -> Result<String, CliError> {
    let coord = parse_addr(addr)?;
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.save_cell(coord, input)?;
    save_engine(file, &engine)?;

    let mut out = report_line(&report, settings);
    out.push_str(&format!(
        "{} = {}\n",
        coord,
        display_value(&mut engine, coord, settings)
    ));
    Ok(out)
}

pub fn cmd_del(file: &Path, addr: &str, settings: &Settings) -> Result<String, CliError> {
    let coord = parse_addr(addr)?;
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.delete_cell(coord)?;
    save_engine(file, &engine)?;
    Ok(report_line(&report, settings))
}

/// List every occupied cell as `ADDR<TAB>display<TAB>raw`, row-major.
pub fn cmd_show(file: &Path, settings: &Settings) -> Result<String, CliError> {
    let mut engine = load_engine(file, policy_from(settings))?;
    let mut coords: Vec<CellCoord> = engine.coords().collect();
    coords.sort();

    let mut out = String::new();
    for coord in coords {
        let shown = display_value(&mut engine, coord, settings);
        let raw = engine
            .cell(coord)
            .map(|c| c.formula.text().to_string())
            .unwrap_or_default();
        out.push_str(&format!("{}\t{}\t{}\n", coord, shown, raw));
    }
    Ok(out)
}

pub enum StructuralOp {
    InsertRows,
    DeleteRows,
    InsertCols,
    DeleteCols,
}

pub fn cmd_structural(
    file: &Path,
    op: StructuralOp,
    at: &str,
    count: u32,
    settings: &Settings,
) -> Result<String, CliError> {
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = match op {
        StructuralOp::InsertRows => engine.insert_rows(parse_row(at)?, count)?,
        StructuralOp::DeleteRows => engine.delete_rows(parse_row(at)?, count)?,
        StructuralOp::InsertCols => engine.insert_columns(parse_col(at)?, count)?,
        StructuralOp::DeleteCols => engine.delete_columns(parse_col(at)?, count)?,
    };
    save_engine(file, &engine)?;

    let mut out = report_line(&report, settings);
    if report.refs_invalidated > 0 {
        out.push_str(&format!(
            "warning: {} reference(s) now point at deleted cells\n",
            report.refs_invalidated
        ));
    }
    if report.labels_dropped > 0 {
        out.push_str(&format!(
            "warning: {} label(s) dropped with their targets\n",
            report.labels_dropped
        ));
    }
    Ok(out)
}

pub fn cmd_fill(
    file: &Path,
    source: &str,
    dest: &str,
    settings: &Settings,
) -> Result<String, CliError> {
    let source = parse_range(source)?;
    let dest = parse_range(dest)?;
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.fill_cells(source, dest)?;
    save_engine(file, &engine)?;
    Ok(report_line(&report, settings))
}

pub fn cmd_copy(
    file: &Path,
    source: &str,
    dest: &str,
    settings: &Settings,
) -> Result<String, CliError> {
    let source = parse_range(source)?;
    let dest = parse_addr(dest)?;
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.copy_cells(source, dest)?;
    save_engine(file, &engine)?;
    Ok(report_line(&report, settings))
}

pub fn cmd_label_set(
    file: &Path,
    name: &str,
    target: &str,
    settings: &Settings,
) -> Result<String, CliError> {
    // A target is a cell, a range, or another label name.
    let target = if let Ok(coord) = CellCoord::parse(target) {
        LabelTarget::Cell(coord)
    } else if let Ok(range) = Range::parse(target) {
        LabelTarget::Range(range.key())
    } else {
        LabelTarget::Label(target.to_string())
    };

    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.set_label(name, target)?;
    save_engine(file, &engine)?;
    Ok(report_line(&report, settings))
}

pub fn cmd_label_del(file: &Path, name: &str, settings: &Settings) -> Result<String, CliError> {
    let mut engine = load_engine(file, policy_from(settings))?;
    let (report, _) = engine.delete_label(name)?;
    save_engine(file, &engine)?;
    Ok(report_line(&report, settings))
}

pub fn cmd_label_list(file: &Path, settings: &Settings) -> Result<String, CliError> {
    let engine = load_engine(file, policy_from(settings))?;
    let mut out = String::new();
    for name in engine.labels().names() {
        if let Some(target) = engine.labels().get(name.as_str()) {
            let shown = match target {
                LabelTarget::Cell(c) => c.to_string(),
                LabelTarget::Range(k) => k.to_string(),
                LabelTarget::Label(alias) => format!("-> {}", alias),
            };
            out.push_str(&format!("{}\t{}\n", name, shown));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sheet(dir: &TempDir) -> PathBuf {
        dir.path().join("sheet.json")
    }

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_set_then_get_roundtrips_through_file() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);

        cmd_set(&file, "A1", "2", &settings()).unwrap();
        let out = cmd_set(&file, "B1", "=A1*21", &settings()).unwrap();
        assert!(out.contains("B1 = 42"));

        let out = cmd_get(&file, "B1", &settings()).unwrap();
        assert_eq!(out, "42\n");
    }

    #[test]
    fn test_get_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);
        let out = cmd_get(&file, "A1", &settings()).unwrap();
        assert_eq!(out, "\n");
        assert!(!file.exists());
    }

    #[test]
    fn test_bad_address_is_usage_error() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);
        let err = cmd_get(&file, "not-an-addr", &settings()).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::EXIT_USAGE);
    }

    #[test]
    fn test_insert_rows_rewrites_saved_formulas() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);

        cmd_set(&file, "A3", "5", &settings()).unwrap();
        cmd_set(&file, "B1", "=A3*2", &settings()).unwrap();
        cmd_structural(&file, StructuralOp::InsertRows, "2", 1, &settings()).unwrap();

        let out = cmd_show(&file, &settings()).unwrap();
        assert!(out.contains("A4\t5\t5"));
        assert!(out.contains("B1\t10\t=A4*2"));
    }

    #[test]
    fn test_delete_rows_warns_about_markers() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);

        cmd_set(&file, "A2", "5", &settings()).unwrap();
        cmd_set(&file, "B1", "=A2", &settings()).unwrap();
        let out = cmd_structural(&file, StructuralOp::DeleteRows, "2", 1, &settings()).unwrap();
        assert!(out.contains("1 reference(s) now point at deleted cells"));

        let out = cmd_get(&file, "B1", &settings()).unwrap();
        assert_eq!(out, "#REF!\n");
    }

    #[test]
    fn test_fill_and_show() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);

        cmd_set(&file, "A1", "1", &settings()).unwrap();
        cmd_set(&file, "A2", "2", &settings()).unwrap();
        cmd_set(&file, "B1", "=A1*10", &settings()).unwrap();
        cmd_fill(&file, "B1", "B2", &settings()).unwrap();

        let out = cmd_get(&file, "B2", &settings()).unwrap();
        assert_eq!(out, "20\n");
    }

    #[test]
    fn test_label_commands() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);

        cmd_set(&file, "A1", "7", &settings()).unwrap();
        cmd_label_set(&file, "Total", "A1", &settings()).unwrap();
        cmd_set(&file, "B1", "=Total+1", &settings()).unwrap();

        assert_eq!(cmd_get(&file, "B1", &settings()).unwrap(), "8\n");

        let out = cmd_label_list(&file, &settings()).unwrap();
        assert_eq!(out, "Total\tA1\n");

        cmd_label_del(&file, "Total", &settings()).unwrap();
        assert_eq!(cmd_get(&file, "B1", &settings()).unwrap(), "#NAME?\n");
    }

    #[test]
    fn test_precision_setting_formats_numbers() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);
        let mut settings = settings();
        settings.precision = Some(2);

        cmd_set(&file, "A1", "=1/3", &settings).unwrap();
        assert_eq!(cmd_get(&file, "A1", &settings).unwrap(), "0.33\n");
    }

    #[test]
    fn test_log_reports_setting() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);
        let mut settings = settings();
        settings.log_reports = true;

        let out = cmd_set(&file, "A1", "1", &settings).unwrap();
        assert!(out.starts_with("[engine/save] immediate  1 written"));
    }

    #[test]
    fn test_bad_row_is_usage_error() {
        let dir = TempDir::new().unwrap();
        let file = sheet(&dir);
        cmd_set(&file, "A1", "1", &settings()).unwrap();
        let err = cmd_structural(&file, StructuralOp::DeleteRows, "0", 1, &settings()).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::EXIT_USAGE);
    }
}
