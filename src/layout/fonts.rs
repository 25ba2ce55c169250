//! Font-size estimation and clustering.
//!
//! Vision backends report boxes, not font sizes. We estimate a raw size per
//! item from its pixel height and line count, then group near-equal sizes
//! so a slide ends up with a handful of consistent text sizes instead of
//! one per box.
//!
//! Clustering walks the sizes in ascending order: a size joins the current
//! cluster while its relative gap to the cluster's largest member stays
//! under [`CLUSTER_TOLERANCE`]. Every member then takes the cluster median.
//! The result depends only on the multiset of sizes, never on input order.

use super::LayoutItem;
use tracing::debug;

/// Ratio of line height to glyph size.
pub const FONT_HEIGHT_RATIO: f64 = 0.75;

/// Maximum relative gap between neighbours in one cluster.
pub const CLUSTER_TOLERANCE: f64 = 0.15;

/// Estimate, cluster and normalise font sizes in place.
///
/// Sets `raw_font_size`, `normalized_font_size_px` and `font_size_cqw` on
/// every item that has a pixel box. Items without one are left untouched.
pub fn normalize_font_sizes(items: &mut [LayoutItem], image_width: u32) {
    let sized: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| item.bbox_px.map(|b| (i, raw_size(b.h, item.line_count()))))
        .collect();
    if sized.is_empty() {
        return;
    }

    let raw: Vec<f64> = sized.iter().map(|(_, s)| *s).collect();
    let normalized = cluster_medians(&raw);

    for ((idx, raw), norm) in sized.into_iter().zip(normalized) {
        let item = &mut items[idx];
        item.raw_font_size = Some(raw);
        item.normalized_font_size_px = Some(norm);
        item.font_size_cqw = (image_width > 0).then(|| norm * 100.0 / f64::from(image_width));
    }
}

fn raw_size(height_px: i32, lines: usize) -> f64 {
    f64::from(height_px) / lines as f64 * FONT_HEIGHT_RATIO
}

/// Map every size to the median of the cluster it falls into.
///
/// Output order matches input order.
pub fn cluster_medians(sizes: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[a].total_cmp(&sizes[b]));

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for idx in order {
        let joins = clusters
            .last()
            .and_then(|c| c.last())
            .is_some_and(|&prev| relative_gap(sizes[prev], sizes[idx]) < CLUSTER_TOLERANCE);
        match clusters.last_mut() {
            Some(cluster) if joins => cluster.push(idx),
            _ => clusters.push(vec![idx]),
        }
    }

    debug!(items = sizes.len(), clusters = clusters.len(), "Font sizes clustered");

    let mut out = vec![0.0; sizes.len()];
    for cluster in &clusters {
        let members: Vec<f64> = cluster.iter().map(|&i| sizes[i]).collect();
        let m = median(&members);
        for &i in cluster {
            out[i] = m;
        }
    }
    out
}

fn relative_gap(prev: f64, curr: f64) -> f64 {
    if prev > 0.0 {
        (curr - prev).abs() / prev
    } else if curr > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Median of an ascending slice: the middle value, or the mean of the two
/// middle values for an even count.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{NormalizedBox, PixelBox};

    fn sized_item(h: i32, text: &str) -> LayoutItem {
        let mut item = LayoutItem::new(text, NormalizedBox::new(0.0, 0.0, 0.0, 0.0));
        item.bbox_px = Some(PixelBox { x: 0, y: 0, w: 10, h });
        item
    }

    #[test]
    fn raw_size_accounts_for_line_count() {
        let mut items = vec![sized_item(80, "one"), sized_item(80, "one\ntwo")];
        normalize_font_sizes(&mut items, 1000);
        assert_eq!(items[0].raw_font_size, Some(60.0));
        assert_eq!(items[1].raw_font_size, Some(30.0));
    }

    #[test]
    fn near_sizes_snap_to_cluster_median() {
        // 20, 21, 22 cluster together (gaps < 15%); 40 stands alone.
        let out = cluster_medians(&[22.0, 40.0, 20.0, 21.0]);
        assert_eq!(out, vec![21.0, 40.0, 21.0, 21.0]);
    }

    #[test]
    fn even_cluster_uses_mean_of_middle_pair() {
        let out = cluster_medians(&[10.0, 11.0]);
        assert_eq!(out, vec![10.5, 10.5]);
    }

    #[test]
    fn gap_is_measured_against_last_member() {
        // 10 → 11 → 12.1 chain even though 12.1 is 21% above 10.
        let out = cluster_medians(&[10.0, 11.0, 12.1]);
        assert_eq!(out, vec![11.0, 11.0, 11.0]);
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let sizes = [30.0, 12.0, 13.0, 31.0, 50.0, 12.5, 29.0];
        let forward = cluster_medians(&sizes);

        let mut reversed_in = sizes;
        reversed_in.reverse();
        let mut reversed_out = cluster_medians(&reversed_in);
        reversed_out.reverse();

        assert_eq!(forward, reversed_out);
    }

    #[test]
    fn cqw_is_percent_of_width() {
        let mut items = vec![sized_item(40, "x")];
        normalize_font_sizes(&mut items, 1000);
        assert_eq!(items[0].normalized_font_size_px, Some(30.0));
        assert_eq!(items[0].font_size_cqw, Some(3.0));
    }

    #[test]
    fn items_without_pixel_box_are_skipped() {
        let mut items = vec![LayoutItem::new("x", NormalizedBox::new(0.0, 0.0, 10.0, 10.0))];
        normalize_font_sizes(&mut items, 1000);
        assert_eq!(items[0].raw_font_size, None);
        assert_eq!(items[0].font_size_cqw, None);
    }

    #[test]
    fn zero_heights_group_together() {
        assert_eq!(cluster_medians(&[0.0, 0.0, 5.0]), vec![0.0, 0.0, 5.0]);
    }
}
