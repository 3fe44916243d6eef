use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};

use crate::{error::ReshuffleError, io::readers::prelude::ImageDecoder};

use super::config::Frequency;

/// First day of the month following `date`, at midnight
fn first_of_next_month(date: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let first = Utc
        .with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
        .single()?;
    first.checked_add_months(Months::new(1))
}

/// Next dekad start: +10 days, or the 1st of the next month when that would
/// leave the month or land on the 31st
pub fn next_dekad(date: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = *date + Duration::days(10);
    if next.month() != date.month() || next.day() == 31 {
        first_of_next_month(date)
    } else {
        Some(next)
    }
}

pub fn next_timestamp(date: &DateTime<Utc>, frequency: Frequency) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Daily => date.checked_add_signed(Duration::days(1)),
        Frequency::Dekadal => next_dekad(date),
        Frequency::Monthly => date.checked_add_months(Months::new(1)),
    }
}

/// Every expected image timestamp between `start` and `end`, both inclusive
pub fn timestamps_for_range(
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    frequency: Frequency,
) -> Result<Vec<DateTime<Utc>>, ReshuffleError> {
    if start > end {
        return Err(format!("start date {start} is after end date {end}").into());
    }
    if frequency == Frequency::Dekadal && ![1, 11, 21].contains(&start.day()) {
        return Err(format!("invalid day for a dekadal product: {}", start.day()).into());
    }

    let mut timestamps = vec![*start];
    while let Some(next) = timestamps.last().and_then(|t| next_timestamp(t, frequency)) {
        if next > *end {
            break;
        }
        timestamps.push(next);
    }
    Ok(timestamps)
}

/// Timestamps of the first and last image found below `root`
pub fn infer_date_range(
    decoder: &dyn ImageDecoder,
    root: &Path,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ReshuffleError> {
    let dates = decoder.available(root)?;
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => Ok((*first, *last)),
        _ => Err(format!(
            "no image in {root:?} follows the file template, give the dates explicitly"
        )
        .into()),
    }
}

/// Data variables of the first image found below `root`
pub fn infer_variables(decoder: &dyn ImageDecoder, root: &Path) -> Result<Vec<String>, ReshuffleError> {
    let (first, _) = infer_date_range(decoder, root)?;
    let path = decoder.resolve(root, &first)?;
    let variables = decoder.variables(&path)?;
    if variables.is_empty() {
        return Err(format!("image {path:?} holds no data variable").into());
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn daily_range_is_inclusive() {
        let ts = timestamps_for_range(&date(2020, 2, 27), &date(2020, 3, 1), Frequency::Daily)
            .expect("valid range");
        assert_eq!(
            ts,
            vec![date(2020, 2, 27), date(2020, 2, 28), date(2020, 2, 29), date(2020, 3, 1)]
        );
    }

    #[test]
    fn dekads_follow_calendar() {
        let ts = timestamps_for_range(&date(2020, 1, 11), &date(2020, 3, 1), Frequency::Dekadal)
            .expect("valid range");
        assert_eq!(
            ts,
            vec![
                date(2020, 1, 11),
                date(2020, 1, 21),
                date(2020, 2, 1),
                date(2020, 2, 11),
                date(2020, 2, 21),
                date(2020, 3, 1),
            ]
        );
        assert!(timestamps_for_range(&date(2020, 1, 5), &date(2020, 3, 1), Frequency::Dekadal)
            .is_err());
    }

    #[test]
    fn monthly_and_inverted_ranges() {
        let ts = timestamps_for_range(&date(2018, 5, 1), &date(2018, 8, 1), Frequency::Monthly)
            .expect("valid range");
        assert_eq!(ts.len(), 4);
        assert!(timestamps_for_range(&date(2018, 8, 1), &date(2018, 5, 1), Frequency::Monthly)
            .is_err());
    }

    #[test]
    fn dates_and_variables_from_the_stack() {
        use ndarray::Array2;

        use crate::{
            io::{readers::zbin::ZBinImageDecoder, writers::helpers::write_image_file},
            models::image::{Image, VariableAttributes},
        };

        let dir = tempfile::tempdir().expect("temp dir");
        let decoder = ZBinImageDecoder::default();
        assert!(infer_date_range(&decoder, dir.path()).is_err());

        let values = Array2::from_elem((2, 4), 0.5f32);
        for d in [3, 1, 2] {
            let image = Image::new(date(2020, 1, d))
                .with_variable("sm", values.clone(), VariableAttributes::default())
                .with_variable("lat", values.clone(), VariableAttributes::default())
                .with_variable("flag", values.clone(), VariableAttributes::default());
            let path = decoder.resolve(dir.path(), &image.timestamp).expect("path");
            write_image_file(&path, &image).expect("image written");
        }

        let (start, end) = infer_date_range(&decoder, dir.path()).expect("dates found");
        assert_eq!((start, end), (date(2020, 1, 1), date(2020, 1, 3)));
        let variables = infer_variables(&decoder, dir.path()).expect("variables found");
        assert_eq!(variables, vec!["flag".to_string(), "sm".to_string()]);
    }
}
