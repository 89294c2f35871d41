//! Region allocation
//!
//! Spreads a requested instance count over the allowed regions. Region
//! diversity is capped by the count: asking for two instances never touches
//! more than two regions. The remainder of the division goes to the first
//! regions in candidate order, so the result is reproducible.

use cp_core::error::AllocationError;

/// Filter value selecting every available region
pub const ALL_REGIONS: &str = "*";

/// Ordered mapping of region slug to instance count
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionAllocation {
    entries: Vec<(String, u32)>,
}

impl RegionAllocation {
    /// Count assigned to `region`, if it was selected
    pub fn get(&self, region: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(r, _)| r == region)
            .map(|(_, count)| *count)
    }

    /// Regions and counts in selection order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(r, c)| (r.as_str(), *c))
    }

    /// Sum of all counts
    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    /// Number of selected regions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no region was selected
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distribute `total` instances across the regions allowed by `filter`
///
/// `filter` is either [`ALL_REGIONS`] or a comma separated list of slugs.
/// Candidates keep the order of `available`.
pub fn allocate(
    available: &[String],
    filter: &str,
    total: u32,
) -> Result<RegionAllocation, AllocationError> {
    if total == 0 {
        return Err(AllocationError::ZeroCount);
    }

    let filter = filter.trim();
    let allowed: Vec<&str> = filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let selected: Vec<&String> = available
        .iter()
        .filter(|region| filter == ALL_REGIONS || allowed.contains(&region.as_str()))
        .fold(Vec::new(), |mut acc, region| {
            // Duplicate slugs from the provider must not count twice
            if !acc.contains(&region) {
                acc.push(region);
            }
            acc
        })
        .into_iter()
        .take(total as usize)
        .collect();

    if selected.is_empty() {
        return Err(AllocationError::NoRegions);
    }

    let n = selected.len() as u32;
    let base = total / n;
    let remainder = (total % n) as usize;

    let entries = selected
        .into_iter()
        .enumerate()
        .map(|(i, region)| {
            let extra = u32::from(i < remainder);
            (region.clone(), base + extra)
        })
        .collect();

    Ok(RegionAllocation { entries })
}
