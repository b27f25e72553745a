use chrono::NaiveDate;

use crate::model::*;

// ── Free-range algorithm ──────────────────────────────────────────

/// Dates within `window` that no CONFIRMED/ACTIVE, non-deleted reservation
/// claims, as maximal inclusive ranges in ascending order.
pub fn free_ranges(vehicle: &VehicleState, window: &DateRange) -> Vec<DateRange> {
    let mut claimed: Vec<DateRange> = vehicle
        .overlapping(window)
        .filter(not_deleted)
        .filter(|r| r.status.is_blocking())
        .map(|r| {
            DateRange::new(
                r.range.start.max(window.start),
                r.range.end.min(window.end),
            )
        })
        .collect();

    if claimed.is_empty() {
        return vec![*window];
    }
    claimed.sort_by_key(|r| r.start);
    let claimed = merge_overlapping(&claimed);
    subtract_ranges(&[*window], &claimed)
}

/// Merge sorted inclusive ranges; ranges that overlap or sit on consecutive
/// days collapse into one.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().is_none_or(|next| range.start <= next)
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Remove every date of `to_remove` from `base`. Both inputs sorted by start,
/// `to_remove` non-overlapping.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start: Option<NaiveDate> = Some(b.start);

        while ri < to_remove.len() && to_remove[ri].end < b.start {
            ri += 1;
        }

        let mut j = ri;
        while let Some(start) = current_start {
            if j >= to_remove.len() || to_remove[j].start > b.end {
                break;
            }
            let r = &to_remove[j];
            if r.start > start
                && let Some(before) = r.start.pred_opt()
            {
                result.push(DateRange::new(start, before));
            }
            current_start = if r.end < start {
                Some(start)
            } else {
                r.end.succ_opt()
            };
            j += 1;
        }

        if let Some(start) = current_start
            && start <= b.end
        {
            result.push(DateRange::new(start, b.end));
        }
    }

    result
}
