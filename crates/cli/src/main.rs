// gridcalc CLI - headless sheet calculation

mod exit_codes;
mod sheet_ops;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::EXIT_SUCCESS;
use gridcalc_config::Settings;
use sheet_ops::StructuralOp;

#[derive(Parser)]
#[command(name = "gridcalc")]
#[command(about = "Dependency-tracked sheet calculation (headless)")]
#[command(version)]
struct Cli {
    /// Sheet file (JSON). Created on first write.
    #[arg(long, short = 's', global = true, default_value = "sheet.json")]
    sheet: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a cell from raw input (formula, number, text)
    #[command(after_help = "\
Examples:
  gridcalc set A1 100
  gridcalc set B1 '=A1*1.2'
  gridcalc set C1 'paid'")]
    Set {
        /// Cell address, e.g. B2
        addr: String,
        /// Raw input; formulas start with =
        input: String,
    },

    /// Print a cell's computed value
    Get {
        /// Cell address, e.g. B2
        addr: String,
    },

    /// Clear a cell
    Del {
        /// Cell address, e.g. B2
        addr: String,
    },

    /// List every occupied cell (address, value, raw input)
    Show,

    /// Insert empty rows, shifting later rows down
    InsertRows {
        /// Row number to insert before (1-based)
        at: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Delete rows, shifting later rows up
    DeleteRows {
        /// First row to delete (1-based)
        at: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Insert empty columns, shifting later columns right
    InsertCols {
        /// Column letter to insert before, e.g. C
        at: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Delete columns, shifting later columns left
    DeleteCols {
        /// First column to delete, e.g. C
        at: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Fill a destination range by tiling a source range
    #[command(after_help = "\
Examples:
  gridcalc fill B1 B2:B100        # fill down, refs translate per row
  gridcalc fill A1:B1 A2:B10")]
    Fill {
        /// Source range, e.g. B1 or A1:B1
        source: String,
        /// Destination range, e.g. B2:B100
        dest: String,
    },

    /// Copy a source range to a destination anchor
    Copy {
        /// Source range, e.g. A1:B3
        source: String,
        /// Top-left destination cell, e.g. D1
        dest: String,
    },

    /// Manage labels (named cells, ranges, and aliases)
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },
}

#[derive(Subcommand)]
enum LabelCommands {
    /// Define or retarget a label
    #[command(after_help = "\
Examples:
  gridcalc label set Total B10
  gridcalc label set Data A1:A100
  gridcalc label set Revenue Total    # alias")]
    Set {
        /// Label name
        name: String,
        /// Target: cell, range, or another label
        target: String,
    },

    /// Remove a label (readers show #NAME?)
    Del {
        /// Label name
        name: String,
    },

    /// List defined labels and their targets
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load();
    let sheet = &cli.sheet;

    let result = match cli.command {
        Commands::Set { addr, input } => sheet_ops::cmd_set(sheet, &addr, &input, &settings),
        Commands::Get { addr } => sheet_ops::cmd_get(sheet, &addr, &settings),
        Commands::Del { addr } => sheet_ops::cmd_del(sheet, &addr, &settings),
        Commands::Show => sheet_ops::cmd_show(sheet, &settings),
        Commands::InsertRows { at, count } => {
            sheet_ops::cmd_structural(sheet, StructuralOp::InsertRows, &at, count, &settings)
        }
        Commands::DeleteRows { at, count } => {
            sheet_ops::cmd_structural(sheet, StructuralOp::DeleteRows, &at, count, &settings)
        }
        Commands::InsertCols { at, count } => {
            sheet_ops::cmd_structural(sheet, StructuralOp::InsertCols, &at, count, &settings)
        }
        Commands::DeleteCols { at, count } => {
            sheet_ops::cmd_structural(sheet, StructuralOp::DeleteCols, &at, count, &settings)
        }
        Commands::Fill { source, dest } => sheet_ops::cmd_fill(sheet, &source, &dest, &settings),
        Commands::Copy { source, dest } => sheet_ops::cmd_copy(sheet, &source, &dest, &settings),
        Commands::Label { command } => match command {
            LabelCommands::Set { name, target } => {
                sheet_ops::cmd_label_set(sheet, &name, &target, &settings)
            }
            LabelCommands::Del { name } => sheet_ops::cmd_label_del(sheet, &name, &settings),
            LabelCommands::List => sheet_ops::cmd_label_list(sheet, &settings),
        },
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                print!("{output}");
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(err) => {
            eprintln!("gridcalc: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
