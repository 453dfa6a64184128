/// One axis of the cartesian product.
///
/// An independent sequence is a dimension with a single column; a flag group
/// is a dimension whose columns advance together.
#[derive(Debug, Clone)]
pub(super) struct Dimension {
    columns: Vec<(usize, Vec<String>)>,
}

impl Dimension {
    pub(super) fn single(arg_index: usize, values: Vec<String>) -> Self {
        Self {
            columns: vec![(arg_index, values)],
        }
    }

    /// Caller guarantees every column has the same length.
    pub(super) fn zipped(columns: Vec<(usize, Vec<String>)>) -> Self {
        Self { columns }
    }

    pub(super) fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, values)| values.len())
    }

    pub(super) fn assign(&self, row: usize, values: &mut [Option<String>]) {
        for (arg_index, column) in &self.columns {
            values[*arg_index] = Some(column[row].clone());
        }
    }
}

pub(super) fn total_points(dimensions: &[Dimension]) -> usize {
    dimensions
        .iter()
        .fold(1usize, |total, dimension| total.saturating_mul(dimension.len()))
}

/// Row indices for every combination, right-most dimension varying fastest.
///
/// With no dimensions this yields a single empty combination, so a
/// declaration without varying flags still produces exactly one job.
pub(super) fn cartesian_indices(dimensions: &[Dimension]) -> Vec<Vec<usize>> {
    let mut partial: Vec<Vec<usize>> = vec![Vec::with_capacity(dimensions.len())];

    for dimension in dimensions {
        partial = partial
            .iter()
            .flat_map(|prefix| {
                (0..dimension.len()).map(move |row| {
                    let mut combo = prefix.clone();
                    combo.push(row);
                    combo
                })
            })
            .collect();
    }

    partial
}
