use crate::error::ConfigError;
use crate::types::Lane;

/// Static, symmetric conflict relation over the eight approach lanes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictTable {
    matrix: [[bool; Lane::COUNT]; Lane::COUNT],
}

impl ConflictTable {
    /// Standard four-way intersection.
    /// True = the two lanes cross paths and may not be occupied together.
    ///
    /// Order: NF(0), NL(1), EF(2), EL(3), SF(4), SL(5), WF(6), WL(7)
    #[rustfmt::skip]
    const STANDARD: [[bool; Lane::COUNT]; Lane::COUNT] = [
        //         NF     NL     EF     EL     SF     SL     WF     WL
        /* NF */ [false, false, true,  false, false, true,  true,  true ],
        /* NL */ [false, false, true,  true,  true,  false, false, true ],
        /* EF */ [true,  true,  false, false, true,  false, false, true ],
        /* EL */ [false, true,  false, false, true,  true,  true,  false],
        /* SF */ [false, true,  true,  true,  false, false, true,  false],
        /* SL */ [true,  false, false, true,  false, false, true,  true ],
        /* WF */ [true,  false, false, true,  true,  true,  false, false],
        /* WL */ [true,  true,  true,  false, false, true,  false, false],
    ];

    pub fn standard() -> Self {
        Self {
            matrix: Self::STANDARD,
        }
    }

    /// Builds a table from 0/1 rows, as found in configuration files.
    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Self, ConfigError> {
        if rows.len() != Lane::COUNT {
            return Err(ConfigError::TableRows {
                expected: Lane::COUNT,
                rows: rows.len(),
            });
        }

        let mut matrix = [[false; Lane::COUNT]; Lane::COUNT];
        for (row, values) in rows.iter().enumerate() {
            if values.len() != Lane::COUNT {
                return Err(ConfigError::TableColumns {
                    row,
                    expected: Lane::COUNT,
                    len: values.len(),
                });
            }
            for (col, &value) in values.iter().enumerate() {
                matrix[row][col] = match value {
                    0 => false,
                    1 => true,
                    _ => return Err(ConfigError::TableValue { row, col, value }),
                };
            }
        }

        for lane in Lane::ALL {
            let i = lane.to_index();
            if matrix[i][i] {
                return Err(ConfigError::SelfConflict(lane));
            }
            for other in Lane::ALL {
                let j = other.to_index();
                if matrix[i][j] != matrix[j][i] {
                    return Err(ConfigError::Asymmetric { a: lane, b: other });
                }
            }
        }

        Ok(Self { matrix })
    }

    /// O(1) check whether two lanes conflict
    pub fn conflicts(&self, a: Lane, b: Lane) -> bool {
        self.matrix[a.to_index()][b.to_index()]
    }

    /// Lanes that may not be occupied together with `lane`.
    pub fn conflicting_lanes(&self, lane: Lane) -> impl Iterator<Item = Lane> + '_ {
        Lane::ALL
            .into_iter()
            .filter(move |other| self.conflicts(lane, *other))
    }

    /// The table as 0/1 rows, the same shape `from_rows` accepts.
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.matrix
            .iter()
            .map(|row| row.iter().map(|&c| u8::from(c)).collect())
            .collect()
    }
}

impl Default for ConflictTable {
    fn default() -> Self {
        Self::standard()
    }
}
