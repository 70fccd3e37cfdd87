//! Nearest-size face query over the index.
//!
//! Similarity here is purely geometric: candidates are ranked by how close
//! their face area is to the query's largest face. It says nothing about
//! identity or appearance.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::detector::FaceDetector;
use crate::index::{detect_with_timeout, FaceIndex};
use crate::types::{FaceBox, IndexedFace, QueryMatch, QueryResult, ScoutError, ScoutResult};

/// Largest face by area; the first one wins ties.
pub fn representative_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces.iter().fold(None, |best: Option<FaceBox>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(*face),
    })
}

/// `candidate` lies in the inclusive band `[query/2, query*2]`.
pub fn in_band(candidate: u64, query: u64) -> bool {
    let (c, q) = (candidate as u128, query as u128);
    2 * c >= q && c <= 2 * q
}

/// `100 * (1 - |c - q| / max(c, q))`.
pub fn similarity_score(candidate: u64, query: u64) -> f32 {
    let max = candidate.max(query);
    if max == 0 {
        return 100.0;
    }
    let diff = candidate.abs_diff(query) as f64;
    (100.0 * (1.0 - diff / max as f64)) as f32
}

/// Filter to the band, rank by area distance, score, and cap.
///
/// The sort is stable, so equal distances keep the index insertion order
/// the candidates arrive in.
pub fn rank_matches(query_area: u64, candidates: Vec<IndexedFace>, limit: usize) -> Vec<QueryMatch> {
    let mut in_range: Vec<IndexedFace> = candidates
        .into_iter()
        .filter(|c| in_band(c.detection.area(), query_area))
        .collect();
    in_range.sort_by_key(|c| c.detection.area().abs_diff(query_area));

    in_range
        .into_iter()
        .take(limit)
        .map(|c| {
            let area = c.detection.area();
            QueryMatch {
                content_hash: c.detection.content_hash,
                file_name: c.file_name,
                image_url: c.image_url,
                page_url: c.page_url,
                face: c.detection.face,
                area,
                similarity: similarity_score(area, query_area),
            }
        })
        .collect()
}

/// Query engine. Reads the index only.
#[derive(Clone)]
pub struct FaceSearch {
    index: FaceIndex,
    detector: Arc<dyn FaceDetector>,
    config: SearchConfig,
}

impl FaceSearch {
    pub fn new(index: FaceIndex, detector: Arc<dyn FaceDetector>, config: SearchConfig) -> Self {
        Self {
            index,
            detector,
            config,
        }
    }

    /// Detect faces in the query image and rank indexed faces by area.
    ///
    /// A query image without a detectable face is `NoFaceFound`, never an
    /// empty success.
    pub async fn search(&self, image_bytes: Vec<u8>) -> ScoutResult<QueryResult> {
        if image_bytes.is_empty() {
            return Err(ScoutError::InvalidInput("query image is empty".to_string()));
        }

        let faces =
            detect_with_timeout(self.detector.clone(), image_bytes, self.config.detect_timeout)
                .await?;
        let query_face = representative_face(&faces).ok_or(ScoutError::NoFaceFound)?;
        let query_area = query_face.area();

        let index = self.index.clone();
        let candidates = tokio::task::spawn_blocking(move || index.candidates(query_area))
            .await
            .map_err(|e| ScoutError::Storage(format!("index query task failed: {e}")))??;

        let matches = rank_matches(query_area, candidates, self.config.max_results);
        tracing::debug!(
            query_area,
            faces = faces.len(),
            matches = matches.len(),
            "face search"
        );

        Ok(QueryResult {
            query_face,
            query_area,
            faces_in_query: faces.len(),
            matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_record;
    use crate::catalog::Catalog;
    use crate::index::tests::{square, FixedDetector};
    use crate::types::FaceDetection;
    use std::collections::HashMap;

    fn indexed(id: i64, width: u32, height: u32) -> IndexedFace {
        IndexedFace {
            detection: FaceDetection {
                id,
                content_hash: format!("h{id}"),
                face: FaceBox::new(0, 0, width, height).unwrap(),
            },
            file_name: format!("h{id}.jpg"),
            image_url: format!("https://example.com/{id}.jpg"),
            page_url: "https://example.com/".to_string(),
        }
    }

    #[test]
    fn test_representative_face_prefers_first_on_tie() {
        let faces = [
            FaceBox::new(1, 1, 10, 20).unwrap(),
            FaceBox::new(2, 2, 20, 10).unwrap(),
            FaceBox::new(3, 3, 5, 5).unwrap(),
        ];
        assert_eq!(representative_face(&faces), Some(faces[0]));
        assert_eq!(representative_face(&[]), None);
    }

    #[test]
    fn test_band_admits_half_to_double() {
        assert!(in_band(50, 100));
        assert!(in_band(100, 100));
        assert!(in_band(200, 100));
        assert!(!in_band(49, 100));
        assert!(!in_band(201, 100));
        assert!(!in_band(400, 100));
    }

    #[test]
    fn test_rank_orders_by_area_distance() {
        // Areas 50, 100, 400 against query 100.
        let ranked = rank_matches(
            100,
            vec![indexed(1, 5, 10), indexed(2, 10, 10), indexed(3, 20, 20)],
            50,
        );
        let areas: Vec<u64> = ranked.iter().map(|m| m.area).collect();
        assert_eq!(areas, vec![100, 50]);
        assert!((ranked[0].similarity - 100.0).abs() < 1e-4);
        assert!((ranked[1].similarity - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order_and_cap() {
        // 80 and 120 are both 20 away from 100.
        let ranked = rank_matches(
            100,
            vec![indexed(7, 10, 12), indexed(3, 8, 10), indexed(9, 10, 10)],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.content_hash.as_str()).collect();
        assert_eq!(ids, vec!["h9", "h7"]);
    }

    #[test]
    fn test_scores_are_in_range() {
        for c in [50u64, 75, 100, 150, 200] {
            let s = similarity_score(c, 100);
            assert!(s > 0.0 && s <= 100.0, "{c} -> {s}");
        }
    }

    fn search_fixture(query_faces: Vec<FaceBox>) -> FaceSearch {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let index = FaceIndex::new(catalog.clone());
        for (hash, side) in [("a", 10u32), ("b", 7), ("c", 30)] {
            catalog.upsert(&sample_record(hash)).unwrap();
            index.record_scan(hash, &[square(side)]).unwrap();
        }
        let mut faces = HashMap::new();
        faces.insert(b"query".to_vec(), query_faces);
        FaceSearch::new(
            index,
            Arc::new(FixedDetector { faces }),
            SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_ranks_indexed_faces() {
        let search = search_fixture(vec![square(4), square(10)]);
        let result = search.search(b"query".to_vec()).await.unwrap();

        assert_eq!(result.query_area, 100);
        assert_eq!(result.faces_in_query, 2);
        let hashes: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.content_hash.as_str())
            .collect();
        // 100 exact, 49 just outside the band, 900 far outside.
        assert_eq!(hashes, vec!["a"]);
    }

    #[tokio::test]
    async fn test_search_without_face_is_no_face_found() {
        let search = search_fixture(vec![]);
        let err = search.search(b"query".to_vec()).await.unwrap_err();
        assert!(matches!(err, ScoutError::NoFaceFound));
    }

    #[tokio::test]
    async fn test_search_rejects_empty_input() {
        let search = search_fixture(vec![square(10)]);
        let err = search.search(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ScoutError::InvalidInput(_)));
    }
}
