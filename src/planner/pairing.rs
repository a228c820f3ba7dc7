//! Pair selection for the small widget.
//!
//! A small square crop framing one of two people looks wrong, so when two
//! subjects sit close enough together the small widget frames both. All
//! scoring happens on boxes normalised to the analysis image (0..1), so the
//! thresholds below are fractions of the frame.

use crate::detect::{SubjectDetection, SubjectKind};
use crate::geometry::Rect;
use std::collections::HashSet;

/// Either box below this area only passes if the pair's union is large.
const MIN_EACH_AREA: f64 = 0.015;
const MIN_UNION_AREA: f64 = 0.06;
const MAX_HORIZONTAL_SEPARATION: f64 = 0.60;
const MAX_VERTICAL_SEPARATION: f64 = 0.35;
const MAX_IOU: f64 = 0.55;
const MAX_OVERLAP_OF_SMALLER: f64 = 0.85;
const MIN_UNION_ASPECT: f64 = 0.35;
const MAX_UNION_ASPECT: f64 = 2.80;
/// Distance from the centre to a corner of the unit square.
const MAX_CENTRE_DISTANCE: f64 = 0.707_106_78;
/// Weighted scores closer than this compare on raw score instead.
const WEIGHT_TIE_BAND: f64 = 0.0005;

/// Two boxes (analysis pixels) the small widget should frame together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairChoice {
    /// Kind used for padding and bias; for a face with a partner of another
    /// kind this is the partner's kind.
    pub kind: SubjectKind,
    pub boxes: [Rect; 2],
    pub score: f64,
}

/// Relative preference between kinds when pair scores are close.
pub fn kind_weight(kind: SubjectKind) -> f64 {
    match kind {
        SubjectKind::Face => 1.00,
        SubjectKind::Human => 0.97,
        SubjectKind::Animal => 0.94,
        SubjectKind::Saliency => 0.88,
    }
}

/// Size and centrality of a normalised box: `0.6·area + 0.4·proximity`.
pub fn box_score(r: &Rect) -> f64 {
    let dx = r.mid_x() - 0.5;
    let dy = r.mid_y() - 0.5;
    let dist = (dx * dx + dy * dy).sqrt();
    let prox = (1.0 - (dist / MAX_CENTRE_DISTANCE).min(1.0)).max(0.0);
    r.area() * 0.6 + prox * 0.4
}

fn union_aspect_ok(a: &Rect, b: &Rect) -> bool {
    let union = a.union(b);
    let aspect = union.width / union.height.max(0.0001);
    (MIN_UNION_ASPECT..=MAX_UNION_ASPECT).contains(&aspect)
}

fn overlap_ok(a: &Rect, b: &Rect) -> bool {
    a.iou(b) <= MAX_IOU && a.overlap_ratio_min(b) <= MAX_OVERLAP_OF_SMALLER
}

/// Rules every framed pair must satisfy (normalised boxes).
pub fn passes_base_constraints(a: &Rect, b: &Rect) -> bool {
    let union_area = a.union(b).area();
    if (a.area() < MIN_EACH_AREA || b.area() < MIN_EACH_AREA) && union_area < MIN_UNION_AREA {
        return false;
    }
    if (a.mid_x() - b.mid_x()).abs() > MAX_HORIZONTAL_SEPARATION {
        return false;
    }
    if (a.mid_y() - b.mid_y()).abs() > MAX_VERTICAL_SEPARATION {
        return false;
    }
    overlap_ok(a, b) && union_aspect_ok(a, b)
}

/// `0.7·score(union) + 0.3·balance`, where balance compares the two boxes'
/// own scores.
fn pair_score(a: &Rect, b: &Rect) -> f64 {
    let union_score = box_score(&a.union(b));
    let (sa, sb) = (box_score(a), box_score(b));
    let balance = sa.min(sb) / sa.max(sb).max(0.0001);
    union_score * 0.7 + balance * 0.3
}

struct Normaliser {
    width: f64,
    height: f64,
}

impl Normaliser {
    fn apply(&self, r: &Rect) -> Rect {
        Rect::new(
            r.x / self.width,
            r.y / self.height,
            r.width / self.width,
            r.height / self.height,
        )
    }
}

/// Best-scoring pair among `boxes` (analysis pixels) that passes the base
/// rules. Later pairs only replace the current best on a strictly higher
/// score.
pub fn best_pair(boxes: &[Rect], width: f64, height: f64) -> Option<([Rect; 2], f64)> {
    if boxes.len() < 2 || width <= 1.0 || height <= 1.0 {
        return None;
    }
    let norm = Normaliser { width, height };
    let mut best: Option<([Rect; 2], f64)> = None;
    for i in 0..boxes.len() - 1 {
        for j in i + 1..boxes.len() {
            let (na, nb) = (norm.apply(&boxes[i]), norm.apply(&boxes[j]));
            if !passes_base_constraints(&na, &nb) {
                continue;
            }
            let s = pair_score(&na, &nb);
            if best.is_none_or(|(_, current)| s > current) {
                best = Some(([boxes[i], boxes[j]], s));
            }
        }
    }
    best
}

fn partner_limits(kind: SubjectKind) -> (f64, f64) {
    match kind {
        SubjectKind::Human => (0.55, 0.35),
        SubjectKind::Animal => (0.58, 0.38),
        _ => (0.60, 0.40),
    }
}

/// Best partner of `kind` for one face, if any partner is close enough.
fn best_partner_for_face(
    face: &Rect,
    partners: &[Rect],
    kind: SubjectKind,
    norm: &Normaliser,
) -> Option<PairChoice> {
    let nf = norm.apply(face);
    let (dx_limit, dy_limit) = partner_limits(kind);
    let mut best: Option<PairChoice> = None;
    for p in partners {
        let np = norm.apply(p);
        if (nf.mid_x() - np.mid_x()).abs() > dx_limit
            || (nf.mid_y() - np.mid_y()).abs() > dy_limit
            || !overlap_ok(&nf, &np)
            || !union_aspect_ok(&nf, &np)
        {
            continue;
        }
        let s = pair_score(&nf, &np);
        if best.is_none_or(|c| s > c.score) {
            best = Some(PairChoice {
                kind,
                boxes: [*face, *p],
                score: s,
            });
        }
    }
    best
}

/// Geometry key: both boxes rounded to hundredths, left box first.
fn geometry_key(choice: &PairChoice, norm: &Normaliser) -> [i64; 8] {
    let r = |v: f64| (v * 100.0).round() as i64;
    let mut boxes = [norm.apply(&choice.boxes[0]), norm.apply(&choice.boxes[1])];
    if boxes[1].min_x() < boxes[0].min_x() {
        boxes.swap(0, 1);
    }
    let [a, b] = boxes;
    [
        r(a.x),
        r(a.y),
        r(a.width),
        r(a.height),
        r(b.x),
        r(b.y),
        r(b.width),
        r(b.height),
    ]
}

/// Candidates built around the top two faces: the face pair itself, plus
/// each face's best human, animal and salient partner.
fn synthetic_face_candidates(detection: &SubjectDetection, norm: &Normaliser) -> Vec<PairChoice> {
    let ranked = &detection.ranked;
    if ranked.face.is_empty() || norm.width <= 1.0 || norm.height <= 1.0 {
        return Vec::new();
    }
    let faces = &ranked.face[..ranked.face.len().min(2)];
    let humans = &ranked.human[..ranked.human.len().min(6)];
    let animals = &ranked.animal[..ranked.animal.len().min(6)];
    let saliency = &ranked.saliency[..ranked.saliency.len().min(8)];

    let mut out = Vec::new();
    if let Some((boxes, score)) = best_pair(faces, norm.width, norm.height) {
        out.push(PairChoice {
            kind: SubjectKind::Face,
            boxes,
            score,
        });
    }
    for face in faces {
        for (kind, list) in [
            (SubjectKind::Human, humans),
            (SubjectKind::Animal, animals),
            (SubjectKind::Saliency, saliency),
        ] {
            out.extend(best_partner_for_face(face, list, kind, norm));
        }
    }

    out.retain(|c| passes_base_constraints(&norm.apply(&c.boxes[0]), &norm.apply(&c.boxes[1])));
    out.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    out.into_iter()
        .filter(|c| seen.insert(geometry_key(c, norm)))
        .collect()
}

/// Choose the pair the small widget should frame, if any.
///
/// Candidates are the best same-kind pair for every kind with at least two
/// boxes plus the face-partner candidates. The winner maximises
/// `score × kind_weight`; weighted scores within 0.0005 of each other
/// compare on raw score. The first candidate wins exact ties.
pub fn pick_pair_for_small(
    detection: &SubjectDetection,
    width: f64,
    height: f64,
) -> Option<PairChoice> {
    let norm = Normaliser { width, height };
    let mut candidates: Vec<PairChoice> = SubjectKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let (boxes, score) = best_pair(detection.ranked.get(kind), width, height)?;
            Some(PairChoice { kind, boxes, score })
        })
        .collect();
    candidates.extend(synthetic_face_candidates(detection, &norm));

    let mut best: Option<PairChoice> = None;
    for c in candidates {
        let replace = match &best {
            None => true,
            Some(current) => {
                let l = current.score * kind_weight(current.kind);
                let r = c.score * kind_weight(c.kind);
                if (l - r).abs() > WEIGHT_TIE_BAND {
                    l < r
                } else {
                    current.score < c.score
                }
            }
        };
        if replace {
            best = Some(c);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RankedBoxes;

    fn r(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::new(x, y, w, h)
    }

    fn detection(ranked: RankedBoxes) -> SubjectDetection {
        SubjectDetection::from_ranked(ranked)
    }

    #[test]
    fn centred_box_scores_higher_than_corner_box() {
        let centre = r(0.4, 0.4, 0.2, 0.2);
        let corner = r(0.0, 0.0, 0.2, 0.2);
        assert!(box_score(&centre) > box_score(&corner));
        // Full frame: area 1, centred.
        assert!((box_score(&r(0.0, 0.0, 1.0, 1.0)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn heavily_overlapping_pair_is_rejected() {
        // IoU = 0.9
        let a = r(0.30, 0.30, 0.20, 0.20);
        let b = r(0.30, 0.30, 0.20, 0.18);
        assert!(a.iou(&b) > 0.55);
        assert!(!passes_base_constraints(&a, &b));
    }

    #[test]
    fn far_apart_pair_is_rejected() {
        let a = r(0.0, 0.4, 0.15, 0.15);
        let b = r(0.8, 0.4, 0.15, 0.15);
        assert!(!passes_base_constraints(&a, &b));
    }

    #[test]
    fn tiny_pair_needs_large_union() {
        let a = r(0.45, 0.45, 0.05, 0.05);
        let b = r(0.52, 0.45, 0.05, 0.05);
        assert!(!passes_base_constraints(&a, &b));
    }

    #[test]
    fn wide_union_is_rejected() {
        // Union aspect ~3.7
        let a = r(0.25, 0.167, 0.10, 0.133);
        let b = r(0.65, 0.173, 0.095, 0.127);
        assert!(!passes_base_constraints(&a, &b));
    }

    #[test]
    fn close_pair_passes() {
        let a = r(0.30, 0.30, 0.15, 0.20);
        let b = r(0.55, 0.32, 0.15, 0.20);
        assert!(passes_base_constraints(&a, &b));
    }

    #[test]
    fn two_close_faces_pair_up() {
        let faces = vec![r(300.0, 300.0, 150.0, 200.0), r(550.0, 320.0, 150.0, 200.0)];
        let det = detection(RankedBoxes { face: faces.clone(), ..Default::default() });
        let choice = pick_pair_for_small(&det, 1000.0, 1000.0).unwrap();
        assert_eq!(choice.kind, SubjectKind::Face);
        assert_eq!(choice.boxes, [faces[0], faces[1]]);
    }

    #[test]
    fn face_with_human_partner_takes_partner_kind() {
        let face = r(300.0, 200.0, 120.0, 150.0);
        let human = r(520.0, 180.0, 200.0, 400.0);
        let det = detection(RankedBoxes {
            face: vec![face],
            human: vec![human],
            ..Default::default()
        });
        let choice = pick_pair_for_small(&det, 1000.0, 1000.0).unwrap();
        assert_eq!(choice.kind, SubjectKind::Human);
        assert_eq!(choice.boxes, [face, human]);
    }

    #[test]
    fn single_box_has_no_pair() {
        let det = detection(RankedBoxes {
            face: vec![r(100.0, 100.0, 100.0, 100.0)],
            ..Default::default()
        });
        assert_eq!(pick_pair_for_small(&det, 1000.0, 1000.0), None);
    }

    #[test]
    fn face_pair_beats_equal_saliency_pair_by_weight() {
        let a = r(300.0, 300.0, 150.0, 200.0);
        let b = r(550.0, 320.0, 150.0, 200.0);
        let det = detection(RankedBoxes {
            face: vec![a, b],
            saliency: vec![a, b],
            ..Default::default()
        });
        let choice = pick_pair_for_small(&det, 1000.0, 1000.0).unwrap();
        assert_eq!(choice.kind, SubjectKind::Face);
    }

    #[test]
    fn duplicate_geometry_is_collapsed() {
        let face = r(300.0, 200.0, 120.0, 150.0);
        let partner = r(520.0, 180.0, 200.0, 400.0);
        let det = detection(RankedBoxes {
            face: vec![face],
            human: vec![partner],
            saliency: vec![partner],
            ..Default::default()
        });
        let norm = Normaliser { width: 1000.0, height: 1000.0 };
        let synthetic = synthetic_face_candidates(&det, &norm);
        assert_eq!(synthetic.len(), 1);
    }
}
