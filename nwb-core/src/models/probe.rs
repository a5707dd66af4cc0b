use polars::prelude::{NamedFrom, Series};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::Table;

/// One row of `ecephys_probes`. `name` encodes the targeted structure (e.g. `probeA`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeRecord {
    pub id: i64,
    pub name: String,
}

impl ProbeRecord {
    pub fn table(probes: &[ProbeRecord]) -> Result<Table> {
        Table::new(vec![
            Series::new("id".into(), probes.iter().map(|p| p.id).collect::<Vec<_>>()),
            Series::new(
                "name".into(),
                probes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            ),
        ])
    }
}
