// Back-face culling and triangle deduplication for exported meshes
//
// Terrain and model exports can carry the same surface twice, once per
// winding. Triangles are keyed by their sorted vertex indices; a pair on the
// same key whose normals point away from each other collapses to the one
// facing +Z, then +Y, then +X.

use std::collections::HashMap;

/// Normals shorter than this (before normalization) mark a degenerate triangle
const DEGENERATE_EPSILON: f32 = 1e-6;

/// Dot product below which two triangles form a front/back pair
const BACK_FACE_DOT: f32 = -0.8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CullStats {
    pub input: usize,
    pub emitted: usize,
    pub degenerate: usize,
    pub collapsed: usize,
    pub malformed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PairAction {
    KeepBoth,
    ReplaceCandidate,
    DiscardNew,
}

struct Candidate {
    indices: [u32; 3],
    normal: [f32; 3],
}

/// Filter a triangle index list, collapsing front/back pairs and dropping
/// degenerate triangles. See [`cull_faces_with_stats`].
pub fn cull_faces(indices: &[u32], vertices: &[f32]) -> Vec<u32> {
    cull_faces_with_stats(indices, vertices).0
}

/// Filter a triangle index list and report what happened to each triangle.
///
/// Triangles that reference vertices outside `vertices` are passed through
/// untouched. Triangles kept because they share a key without being a back
/// face pair are emitted in input order; the first triangle seen for every
/// key is held back and appended after the scan in first-seen order.
pub fn cull_faces_with_stats(indices: &[u32], vertices: &[f32]) -> (Vec<u32>, CullStats) {
    let mut stats = CullStats::default();
    if indices.is_empty() {
        return (Vec::new(), stats);
    }

    let mut output = Vec::with_capacity(indices.len());
    let mut slots: HashMap<[u32; 3], usize> = HashMap::new();
    let mut pending: Vec<Candidate> = Vec::new();

    let mut triangles = indices.chunks_exact(3);
    for triangle in &mut triangles {
        let tri = [triangle[0], triangle[1], triangle[2]];
        stats.input += 1;

        let Some([p0, p1, p2]) = fetch_triangle(vertices, tri) else {
            stats.malformed += 1;
            output.extend_from_slice(&tri);
            continue;
        };

        let normal = cross(sub(p1, p0), sub(p2, p0));
        let length = dot(normal, normal).sqrt();
        if length < DEGENERATE_EPSILON {
            stats.degenerate += 1;
            continue;
        }
        let normal = [normal[0] / length, normal[1] / length, normal[2] / length];

        let mut key = tri;
        key.sort_unstable();

        let Some(&slot) = slots.get(&key) else {
            slots.insert(key, pending.len());
            pending.push(Candidate { indices: tri, normal });
            continue;
        };

        let candidate = &mut pending[slot];
        match classify_pair(candidate.normal, normal) {
            PairAction::KeepBoth => output.extend_from_slice(&tri),
            PairAction::ReplaceCandidate => {
                stats.collapsed += 1;
                *candidate = Candidate { indices: tri, normal };
            }
            PairAction::DiscardNew => stats.collapsed += 1,
        }
    }

    for candidate in &pending {
        output.extend_from_slice(&candidate.indices);
    }

    // A trailing partial triple cannot be culled; keep it at the end so
    // every full triple stays aligned.
    output.extend_from_slice(triangles.remainder());

    stats.emitted = output.len() / 3;
    (output, stats)
}

fn classify_pair(existing: [f32; 3], incoming: [f32; 3]) -> PairAction {
    if dot(existing, incoming) >= BACK_FACE_DOT {
        return PairAction::KeepBoth;
    }
    if facing_score(incoming) > facing_score(existing) {
        PairAction::ReplaceCandidate
    } else {
        PairAction::DiscardNew
    }
}

fn facing_score(normal: [f32; 3]) -> f32 {
    normal[2] * 4.0 + normal[1] * 2.0 + normal[0]
}

fn fetch_triangle(vertices: &[f32], tri: [u32; 3]) -> Option<[[f32; 3]; 3]> {
    let fetch = |index: u32| -> Option<[f32; 3]> {
        let base = (index as usize).checked_mul(3)?;
        let slice = vertices.get(base..base.checked_add(3)?)?;
        Some([slice[0], slice[1], slice[2]])
    };
    Some([fetch(tri[0])?, fetch(tri[1])?, fetch(tri[2])?])
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
