use std::collections::BTreeMap;

use crate::{
    error::ReshuffleError,
    models::{
        cell::{CellId, CellPartitioner},
        grid::{GridIndex, GridSubset},
        image::Image,
        series::TimeSeriesBuffer,
    },
};

/// One empty buffer per cell touched by `subset`
pub fn build_buffers(
    subset: &GridSubset,
    partitioner: &CellPartitioner,
    variables: &[String],
) -> BTreeMap<CellId, TimeSeriesBuffer> {
    partitioner
        .group(subset)
        .into_iter()
        .map(|(cell, positions)| {
            let points = positions.iter().map(|pos| subset.points()[*pos]).collect();
            (cell, TimeSeriesBuffer::new(cell, points, variables))
        })
        .collect()
}

/// Checks that the image covers the full grid and carries every variable
pub fn validate_image(
    image: &Image,
    grid: &GridIndex,
    variables: &[String],
) -> Result<(), String> {
    for var in variables {
        let data = image
            .get(var)
            .ok_or_else(|| format!("variable {var} missing"))?;
        if data.values.dim() != grid.shape() {
            return Err(format!(
                "variable {} has shape {:?}, grid is {:?}",
                var,
                data.values.dim(),
                grid.shape()
            ));
        }
    }
    Ok(())
}

/// Appends the values of `image` at the buffer's points, one time step
pub fn accumulate(buffer: &mut TimeSeriesBuffer, image: &Image, variables: &[String]) {
    let points = buffer.points().to_vec();
    for var in variables {
        let Some(data) = image.get(var) else {
            continue;
        };
        if let Some(values) = buffer.values_mut(var) {
            values.extend(points.iter().map(|p| data.values[[p.row, p.col]]));
        }
    }
    buffer.push_timestamp(image.timestamp);
}

/// Cells holding at least `flush_limit` buffered timestamps
pub fn cells_to_flush(buffers: &BTreeMap<CellId, TimeSeriesBuffer>, flush_limit: usize) -> Vec<CellId> {
    buffers
        .iter()
        .filter(|(_, b)| b.len() >= flush_limit)
        .map(|(cell, _)| *cell)
        .collect()
}

/// Error of a failed flush, labelled with its cell
pub fn flush_error(cell: CellId, err: ReshuffleError) -> ReshuffleError {
    match err {
        ReshuffleError::Write { .. } => err,
        other => ReshuffleError::write(cell, other),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    use super::*;
    use crate::models::{grid::BoundingBox, image::VariableAttributes};

    #[test]
    fn gathers_cell_points() {
        let grid = GridIndex::new(1.0).expect("valid grid");
        let partitioner = CellPartitioner::new(&grid, 5.0).expect("valid cells");
        let bbox = BoundingBox::new(0.0, 0.0, 9.9, 4.9).expect("valid bbox");
        let subset = grid.subset(Some(&bbox), false).expect("subset");
        let variables = vec!["sm".to_string()];

        let mut buffers = build_buffers(&subset, &partitioner, &variables);
        assert_eq!(buffers.len(), 2);

        let values = Array2::from_shape_fn(grid.shape(), |(r, c)| (r * 1000 + c) as f32);
        let image = Image::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()).with_variable(
            "sm",
            values,
            VariableAttributes::default(),
        );
        validate_image(&image, &grid, &variables).expect("full image");
        for buffer in buffers.values_mut() {
            accumulate(buffer, &image, &variables);
        }

        assert_eq!(cells_to_flush(&buffers, 1).len(), 2);
        assert!(cells_to_flush(&buffers, 2).is_empty());

        let (_, first) = buffers.iter_mut().next().expect("one cell");
        let segment = first.take_segment(|_| VariableAttributes::default());
        let p = segment.points[0];
        let sm = segment.variable("sm").expect("sm");
        assert_eq!(sm.values[[0, 0]], (p.row * 1000 + p.col) as f32);
        assert_eq!(segment.n_points(), 25);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let grid = GridIndex::new(1.0).expect("valid grid");
        let image = Image::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()).with_variable(
            "sm",
            Array2::zeros((2, 2)),
            VariableAttributes::default(),
        );
        assert!(validate_image(&image, &grid, &["sm".to_string()]).is_err());
        assert!(validate_image(&image, &grid, &["vod".to_string()]).is_err());
    }
}
