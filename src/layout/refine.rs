//! Comparison of a refined layout against the initial detection.
//!
//! Refined items are paired with initial ones by best box overlap rather
//! than by position in the list, since backends routinely reorder, merge or
//! split regions. Pairs below [`MIN_MATCH_IOU`] are not considered the same
//! region.

use super::LayoutItem;
use serde::{Deserialize, Serialize};

/// Minimum intersection-over-union for two items to be paired.
pub const MIN_MATCH_IOU: f64 = 0.3;

/// Summed coordinate shift (normalised units) that counts as a box adjustment.
pub const SHIFT_THRESHOLD: f64 = 10.0;

/// How many change descriptions to keep for logging.
const MAX_DETAILS: usize = 5;

/// Summary of what a refinement pass changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementReport {
    pub initial_items: usize,
    pub refined_items: usize,
    pub text_corrections: usize,
    pub box_adjustments: usize,
    /// Items on either side left without a partner.
    pub mismatched: usize,
    /// First few human-readable changes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl RefinementReport {
    pub fn has_changes(&self) -> bool {
        self.text_corrections > 0 || self.box_adjustments > 0 || self.mismatched > 0
    }

    fn note(&mut self, line: String) {
        if self.details.len() < MAX_DETAILS {
            self.details.push(line);
        }
    }
}

/// Pair refined items with initial ones and count the differences.
pub fn diff_refinement(initial: &[LayoutItem], refined: &[LayoutItem]) -> RefinementReport {
    let mut report = RefinementReport {
        initial_items: initial.len(),
        refined_items: refined.len(),
        ..Default::default()
    };
    let mut used = vec![false; initial.len()];
    let mut paired = 0usize;

    for new in refined {
        let best = initial
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(i, old)| (i, old.bbox.iou(&new.bbox)))
            .filter(|(_, iou)| *iou >= MIN_MATCH_IOU)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((idx, _)) = best else {
            continue;
        };
        used[idx] = true;
        paired += 1;
        let old = &initial[idx];

        if old.text != new.text {
            report.text_corrections += 1;
            report.note(format!(
                "text: '{}' -> '{}'",
                preview(&old.text),
                preview(&new.text)
            ));
        }
        let shift = old.bbox.shift(&new.bbox);
        if shift > SHIFT_THRESHOLD {
            report.box_adjustments += 1;
            report.note(format!("box of '{}' moved by {shift:.0}", preview(&new.text)));
        }
    }

    report.mismatched = (initial.len() - paired) + (refined.len() - paired);
    report
}

fn preview(text: &str) -> String {
    let mut s: String = text.chars().take(20).collect();
    if text.chars().count() > 20 {
        s.push('…');
    }
    s.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::NormalizedBox;

    fn item(text: &str, b: [f64; 4]) -> LayoutItem {
        LayoutItem::new(text, NormalizedBox::from(b))
    }

    #[test]
    fn identical_layouts_report_nothing() {
        let a = vec![item("Title", [50.0, 50.0, 120.0, 900.0])];
        let r = diff_refinement(&a, &a);
        assert!(!r.has_changes());
        assert_eq!(r.initial_items, 1);
        assert_eq!(r.refined_items, 1);
    }

    #[test]
    fn counts_text_and_box_changes_regardless_of_order() {
        let initial = vec![
            item("Quartely", [50.0, 50.0, 120.0, 900.0]),
            item("Body", [300.0, 50.0, 600.0, 900.0]),
        ];
        let refined = vec![
            item("Body", [300.0, 50.0, 620.0, 900.0]),
            item("Quarterly", [50.0, 50.0, 120.0, 900.0]),
        ];
        let r = diff_refinement(&initial, &refined);
        assert_eq!(r.text_corrections, 1);
        assert_eq!(r.box_adjustments, 1);
        assert_eq!(r.mismatched, 0);
        assert_eq!(r.details.len(), 2);
    }

    #[test]
    fn small_shift_is_not_an_adjustment() {
        let initial = vec![item("A", [100.0, 100.0, 200.0, 400.0])];
        let refined = vec![item("A", [102.0, 102.0, 202.0, 402.0])];
        assert_eq!(diff_refinement(&initial, &refined).box_adjustments, 0);
    }

    #[test]
    fn unmatched_items_on_both_sides_are_counted() {
        let initial = vec![item("Old", [0.0, 0.0, 100.0, 100.0])];
        let refined = vec![
            item("New", [500.0, 500.0, 600.0, 600.0]),
            item("Other", [700.0, 700.0, 800.0, 800.0]),
        ];
        let r = diff_refinement(&initial, &refined);
        assert_eq!(r.mismatched, 3);
        assert_eq!(r.text_corrections, 0);
    }

    #[test]
    fn details_are_capped() {
        let initial: Vec<_> = (0..8)
            .map(|i| item("x", [i as f64 * 100.0, 0.0, i as f64 * 100.0 + 50.0, 500.0]))
            .collect();
        let refined: Vec<_> = initial
            .iter()
            .map(|it| LayoutItem { text: "y".into(), ..it.clone() })
            .collect();
        let r = diff_refinement(&initial, &refined);
        assert_eq!(r.text_corrections, 8);
        assert_eq!(r.details.len(), MAX_DETAILS);
    }
}
