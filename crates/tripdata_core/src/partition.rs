use std::fmt;

use url::Url;

use crate::Category;

/// Months covered by every year of the dataset.
pub const MONTHS: std::ops::RangeInclusive<u32> = 1..=12;

/// One remote file: a single category/year/month slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub category: Category,
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    pub fn new(category: Category, year: i32, month: u32) -> Self {
        Self {
            category,
            year,
            month,
        }
    }

    /// `{category}_tripdata_{year}-{month:02}.{extension}`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_tripdata_{}-{:02}.{}",
            self.category.slug(),
            self.year,
            self.month,
            extension
        )
    }

    /// Joins the partition's file name onto `base`. A trailing slash on the
    /// base is optional.
    pub fn remote_url(&self, base: &Url, extension: &str) -> Result<Url, url::ParseError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&self.file_name(extension))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{:02}", self.category, self.year, self.month)
    }
}

/// Full partition key space: category-major in the given order, then year
/// ascending, then month ascending.
pub fn enumerate_partitions(
    categories: &[Category],
    years: std::ops::RangeInclusive<i32>,
) -> Vec<PartitionKey> {
    let mut keys = Vec::with_capacity(categories.len() * years.clone().count() * MONTHS.count());
    for &category in categories {
        for year in years.clone() {
            for month in MONTHS {
                keys.push(PartitionKey::new(category, year, month));
            }
        }
    }
    keys
}
