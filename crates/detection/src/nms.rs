//! Greedy non-maximum suppression.

use itertools::Itertools;

use crate::bbox::{Bbox, ConvertBbox, Xyxy};

/// Applies Non-Maximum Suppression (NMS) to the given bounding boxes and scores.
///
/// NMS is used to remove overlapping boxes with lower scores, keeping only the highest scoring
/// boxes. The boxes are visited in descending score order, a box is kept unless it overlaps an
/// already kept box with an IoU of at least `threshold`. Equal scores are visited in input order,
/// which makes the result deterministic.
///
/// Returns the indices of the kept boxes, in descending score order.
pub fn non_max_suppression<B>(detections: &[(B, f32)], threshold: f32) -> Vec<usize>
where
    B: ConvertBbox<Xyxy>,
{
    top_k_non_max_suppression(detections, threshold, usize::MAX)
}

/// [`non_max_suppression`] that stops after `max_output` boxes have been kept.
pub fn top_k_non_max_suppression<B>(
    detections: &[(B, f32)],
    threshold: f32,
    max_output: usize,
) -> Vec<usize>
where
    B: ConvertBbox<Xyxy>,
{
    let boxes = detections
        .iter()
        .map(|(bbox, _)| bbox.convert())
        .collect::<Vec<Bbox<Xyxy>>>();

    // stable, so ties keep their input order
    let order = detections
        .iter()
        .enumerate()
        .sorted_by(|(_, (_, a)), (_, (_, b))| b.total_cmp(a))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();

    for (rank, &i) in order.iter().enumerate() {
        if keep.len() >= max_output {
            break;
        }

        if suppressed[i] {
            continue;
        }

        keep.push(i);

        for &j in &order[rank + 1..] {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) >= threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Applies [`top_k_non_max_suppression`] independently for every class label.
///
/// Boxes of different classes never suppress each other. At most `max_per_class` boxes are kept
/// per class. Returns the indices of the kept boxes, in descending score order.
pub fn batched_non_max_suppression<B>(
    detections: &[(B, f32, usize)],
    threshold: f32,
    max_per_class: usize,
) -> Vec<usize>
where
    B: ConvertBbox<Xyxy>,
{
    let classes = detections
        .iter()
        .map(|(_, _, class)| *class)
        .unique()
        .sorted()
        .collect::<Vec<_>>();

    let mut keep = Vec::new();
    for class in classes {
        let members = detections
            .iter()
            .enumerate()
            .filter(|(_, (_, _, c))| *c == class)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        let subset = members
            .iter()
            .map(|&index| (detections[index].0.convert(), detections[index].1))
            .collect::<Vec<(Bbox<Xyxy>, f32)>>();

        keep.extend(
            top_k_non_max_suppression(&subset, threshold, max_per_class)
                .into_iter()
                .map(|i| members[i]),
        );
    }

    keep.sort_by(|&a, &b| detections[b].1.total_cmp(&detections[a].1).then(a.cmp(&b)));
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Vec<(Bbox<Xyxy>, f32)> {
        vec![
            (Bbox::xyxy(0.0, 0.0, 100.0, 100.0), 0.9),
            (Bbox::xyxy(0.0, 0.0, 100.0, 90.0), 0.8),
            (Bbox::xyxy(10.0, 10.0, 110.0, 110.0), 0.7),
            (Bbox::xyxy(200.0, 200.0, 260.0, 260.0), 0.6),
            (Bbox::xyxy(210.0, 200.0, 270.0, 260.0), 0.95),
            (Bbox::xyxy(400.0, 0.0, 450.0, 50.0), 0.1),
        ]
    }

    #[test]
    fn keeps_highest_of_overlapping_pair() {
        let detections = [
            (Bbox::xyxy(0.0, 0.0, 100.0, 90.0), 0.6),
            (Bbox::xyxy(0.0, 0.0, 100.0, 100.0), 0.8),
        ];
        assert!((detections[0].0.iou(&detections[1].0) - 0.9).abs() < 1e-6);

        assert_eq!(non_max_suppression(&detections, 0.7), vec![1]);
    }

    #[test]
    fn disjoint_boxes_survive_in_score_order() {
        let detections = [
            (Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 0.2),
            (Bbox::xyxy(20.0, 0.0, 30.0, 10.0), 0.9),
            (Bbox::xyxy(40.0, 0.0, 50.0, 10.0), 0.5),
        ];

        assert_eq!(non_max_suppression(&detections, 0.5), vec![1, 2, 0]);
    }

    #[test]
    fn ties_are_broken_by_index() {
        let bbox = Bbox::xyxy(0.0, 0.0, 10.0, 10.0);
        let detections = [(bbox, 0.5), (bbox, 0.5), (bbox, 0.5)];

        assert_eq!(non_max_suppression(&detections, 0.5), vec![0]);
    }

    #[test]
    fn idempotent() {
        let detections = cluster();

        for threshold in [0.1, 0.3, 0.5, 0.7, 0.9] {
            let first = non_max_suppression(&detections, threshold)
                .into_iter()
                .map(|i| detections[i])
                .collect::<Vec<_>>();
            let second = non_max_suppression(&first, threshold);

            assert_eq!(second, (0..first.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn higher_threshold_keeps_at_least_as_many() {
        let detections = cluster();

        let counts = [0.05, 0.2, 0.4, 0.6, 0.8, 0.95, 1.0]
            .iter()
            .map(|&threshold| non_max_suppression(&detections, threshold).len())
            .collect::<Vec<_>>();

        assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]), "{counts:?}");
    }

    #[test]
    fn top_k_limits_output() {
        let detections = cluster();

        assert_eq!(top_k_non_max_suppression(&detections, 1.0, 2), vec![4, 0]);
        assert!(top_k_non_max_suppression(&detections, 0.5, 0).is_empty());
    }

    #[test]
    fn empty_input() {
        let detections: [(Bbox<Xyxy>, f32); 0] = [];
        assert!(non_max_suppression(&detections, 0.5).is_empty());
    }

    #[test]
    fn classes_do_not_suppress_each_other() {
        let bbox = Bbox::xyxy(0.0, 0.0, 10.0, 10.0);
        let detections = [(bbox, 0.9, 0), (bbox, 0.8, 1), (bbox, 0.7, 0), (bbox, 0.95, 2)];

        assert_eq!(batched_non_max_suppression(&detections, 0.5, 10), vec![3, 0, 1]);
    }

    #[test]
    fn batched_limit_is_per_class() {
        let detections = [
            (Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 0.9, 0),
            (Bbox::xyxy(20.0, 0.0, 30.0, 10.0), 0.8, 0),
            (Bbox::xyxy(40.0, 0.0, 50.0, 10.0), 0.7, 1),
        ];

        assert_eq!(batched_non_max_suppression(&detections, 0.5, 1), vec![0, 2]);
    }
}
