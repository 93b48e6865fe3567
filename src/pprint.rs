use crate::common::Idx;
use crate::data::{GridPos, KernelData};
use crate::kernel::Kernel;
use crate::launch::{LaunchDim, LaunchLimits, POISON};
use crate::statement::{StatementExec, StatementNode};
use crate::trace::VisitLog;
use crate::utils::indent;

use itertools::Itertools;
use prettytable::{self, format, row, Cell};

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum PrintStyle {
    Full,
    Compact,
}

/// Pretty-print a [Kernel]'s statement tree to stdout.
pub fn pprint(kernel: &Kernel, limits: &LaunchLimits, style: PrintStyle) {
    pprint_table(kernel, limits, style).printstd()
}

pub fn pprint_string(kernel: &Kernel, limits: &LaunchLimits, style: PrintStyle) -> String {
    format!("{}", pprint_table(kernel, limits, style))
}

/// Print the indices each execution unit visited, one row per unit.
pub fn pprint_visits(log: &VisitLog) {
    visits_table(log).printstd()
}

pub fn pprint_visits_string(log: &VisitLog) -> String {
    format!("{}", visits_table(log))
}

fn pprint_table(kernel: &Kernel, limits: &LaunchLimits, style: PrintStyle) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    let titles = match style {
        PrintStyle::Full => row!["Statement", "Blocks", "Threads"],
        PrintStyle::Compact => row!["Statement"],
    };
    table.set_titles(titles);

    let data = KernelData::new(kernel.segments().iter().copied(), GridPos::host());
    for stmt in kernel.root().stmts() {
        pprint_inner(&mut table, stmt, &data, &limits.max_dims, 0, style);
    }

    set_format(&mut table);
    table
}

fn pprint_inner(
    table: &mut prettytable::Table,
    stmt: &StatementNode,
    data: &KernelData,
    max_physical: &LaunchDim,
    depth: usize,
    style: PrintStyle,
) {
    let main_str = format!("{}{}", indent(depth), stmt.pprint_line());
    let r = match style {
        PrintStyle::Full => {
            let dims = stmt.calculate_dimensions(data, max_physical);
            let mut r = row![main_str];
            r.add_cell(Cell::new(&coordinate_str(dims.blocks)));
            r.add_cell(Cell::new(&coordinate_str(dims.threads)));
            r
        }
        PrintStyle::Compact => row![main_str],
    };
    table.add_row(r);

    for child in stmt.children() {
        pprint_inner(table, child, data, max_physical, depth + 1, style);
    }
}

fn coordinate_str(c: Idx) -> String {
    match c {
        0 => "".to_owned(),
        POISON => "infeasible".to_owned(),
        _ => c.to_string(),
    }
}

fn visits_table(log: &VisitLog) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    table.set_titles(row!["Block", "Thread", "Visits", "Indices"]);
    for ((block, thread), visits) in log.by_unit() {
        let indices = visits
            .iter()
            .map(|v| format!("({})", v.iter().join(", ")))
            .join(" ");
        table.add_row(row![block, thread, visits.len(), indices]);
    }
    set_format(&mut table);
    table
}

fn set_format(table: &mut prettytable::Table) {
    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
}
