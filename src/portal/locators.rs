//! Every DOM location the portal integration touches, in one place.
//!
//! Portal markup drift is the primary real-world failure mode for this tool,
//! so selectors and row-label spellings live here as data instead of being
//! inlined in control flow. The alternate-label lists collect every spelling
//! the portal has historically used for a row; lookups try them in order.

pub const RESULTS_TABLE: &str =
    "/html/body/table/tbody/tr[2]/th/table/tbody/tr/td[2]/table[3]/tbody";

/// Summary row showing the running dam levels as whitespace-separated tokens.
pub const DAM_SUMMARY_ROW: &str =
    "/html/body/table/tbody/tr[2]/th/table/tbody/tr/td[2]/table[3]/tbody/tr[2]";

/// Marker that disappears once a submission has been accepted.
pub const PENDING_MARKER: &str =
    "/html/body/table/tbody/tr[2]/th/table/tbody/tr/td[1]/table[1]/tbody/tr[2]/td";

pub const LOGIN_USERNAME: &str = r#"input[name="username"]"#;
pub const LOGIN_PASSWORD: &str = r#"input[name="password"]"#;

pub const ENTRY_FORM_LINK_TEXT: &str = "Turbidity";
pub const ENTRY_VALUE_INPUT: &str = r#"input[name="tvalue"]"#;
pub const ENTRY_CONFIRM_CHECKBOX: &str = "#checkbox";
pub const ENTRY_SUBMIT_BUTTON: &str = "#button";

/// Hour columns occupy this fixed cell range in every row.
pub const FIRST_DATA_COLUMN: usize = 4;
pub const LAST_DATA_COLUMN: usize = 11;

pub const DAM_LEVEL_ROW: &str = "Dam Level";
pub const TURBIDITY_ROW: &str = "Turbidity";
pub const RESERVOIR_STATUS_ROW: &str = "Old Reservoir P3 Status";
pub const OPERATOR_ROW: &str = "Encoded By";

pub const BIG_TANK_ROW_ALTERNATES: &[&str] = &[
    "Old Reservoir P3 Big Tank Water Level",
    "Old Reservoir P3 Big Tank Level",
    "Old Reservoir Big Tank Water Level",
    "Old Reservoir Big Tank Level",
];

pub const TANK_A_ROW_ALTERNATES: &[&str] = &[
    "Tank Water Level Phase 1 A",
    "Tank Water Level - Phase 1 A",
    "Tank Water Level Phase 1",
    "Tank Water Level A",
];

pub const TANK_B_ROW_ALTERNATES: &[&str] = &[
    "Tank Water Level Phase 1 B",
    "Tank Water Level - Phase 1 B",
    "Tank Water Level Phase 2 B",
    "Tank Water Level - Phase 2 B",
    "Tank Water Level Phase 2",
    "Tank Water Level B",
];

pub const TANK_CD_ROW_ALTERNATES: &[&str] = &[
    "Tank Water Level Phase 2 C",
    "Tank Water Level - Phase 2 C",
    "Tank Water Level Phase 2 D",
    "Tank Water Level - Phase 2 D",
    "Tank Water Level Phase 3 C & D",
    "Tank Water Level Phase 3 C&D",
    "Tank Water Level - Phase 3 C & D",
    "Tank Water Level Phase 3",
    "Tank Water Level C & D",
    "Tank Water Level C&D",
];

pub fn header_cells() -> String {
    format!(
        "{RESULTS_TABLE}/tr[1]/td[position() >= {FIRST_DATA_COLUMN} and position() <= {LAST_DATA_COLUMN}]"
    )
}

pub fn results_table_header_row() -> String {
    format!("{RESULTS_TABLE}/tr[1]")
}

/// Cells the portal blanks to "0.00" when a fresh entry slot opens.
pub fn readiness_cells() -> String {
    format!(
        "{RESULTS_TABLE}/tr[5]/td[position() >= {FIRST_DATA_COLUMN} and position() <= {LAST_DATA_COLUMN}]"
    )
}

pub fn labeled_row_cell(row_label: &str, column: usize) -> String {
    format!(
        r#"{RESULTS_TABLE}/tr[td[1][contains(normalize-space(.), "{row_label}")]]/td[{column}]"#
    )
}

pub fn tank_row_cell(phase_label: &str, tank_label: &str, column: usize, exact: bool) -> String {
    let tank_predicate = if exact {
        format!(r#"td[3][normalize-space(.)="{tank_label}"]"#)
    } else {
        format!(r#"td[3][contains(normalize-space(.), "{tank_label}")]"#)
    };
    format!(
        r#"{RESULTS_TABLE}/tr[td[2][contains(normalize-space(.), "{phase_label}")] and {tank_predicate}]/td[{column}]"#
    )
}
