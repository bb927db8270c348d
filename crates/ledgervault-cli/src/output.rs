//! Terminal output helpers.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

/// Create a table with the house style.
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}
