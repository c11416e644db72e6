use serde::{Deserialize, Serialize};

use crate::coord::CellCoord;
use crate::formula::{Formula, Value};

/// Number display format applied when rendering a cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum NumberFormat {
    #[default]
    General,
    Number { decimals: u8 },
    Currency { decimals: u8 },
    Percent { decimals: u8 },
}

/// Cell formatting options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CellFormat {
    pub bold: bool,
    pub italic: bool,
    pub number_format: NumberFormat,
}

impl CellFormat {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// One occupied cell: its address, content, and formatting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    pub coord: CellCoord,
    pub formula: Formula,
    #[serde(default, skip_serializing_if = "CellFormat::is_default")]
    pub format: CellFormat,
}

impl Cell {
    pub fn new(coord: CellCoord, input: impl Into<String>) -> Self {
        Self {
            coord,
            formula: Formula::new(input),
            format: CellFormat::default(),
        }
    }

    /// The display string: formatted value, error code, or empty if not
    /// yet computed.
    pub fn rendered(&self) -> String {
        match self.formula.computed() {
            Some(Ok(value)) => format_value(value, &self.format.number_format),
            Some(Err(error)) => error.code().to_string(),
            None => String::new(),
        }
    }
}

/// Format a computed value for display.
pub fn format_value(value: &Value, format: &NumberFormat) -> String {
    match value {
        Value::Number(n) => format_number(*n, format),
        other => other.to_text(),
    }
}

fn format_number(n: f64, format: &NumberFormat) -> String {
    match format {
        NumberFormat::General => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", n as i64)
            } else {
                format!("{}", n)
            }
        }
        NumberFormat::Number { decimals } => format!("{:.*}", *decimals as usize, n),
        NumberFormat::Currency { decimals } => {
            if n < 0.0 {
                format!("-${:.*}", *decimals as usize, n.abs())
            } else {
                format!("${:.*}", *decimals as usize, n)
            }
        }
        NumberFormat::Percent { decimals } => format!("{:.*}%", *decimals as usize, n * 100.0),
    }
}
