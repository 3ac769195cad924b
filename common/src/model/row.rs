use std::collections::HashMap;

/// One recipient's data: field name to value, as parsed from the spreadsheet
/// by the client before submission.
pub type Row = HashMap<String, String>;
