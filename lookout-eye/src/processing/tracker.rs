//! Multi-object tracking
//!
//! Greedy IoU association: existing tracks claim detections in registration
//! order, so the oldest track wins contested detections. This is not a
//! globally optimal assignment.

use crate::config::TrackerConfig;
use crate::models::{BoundingBox, Detection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Tracked object with a persistent ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub object: Detection,
    /// Updates since the last successful match
    pub age: u32,
    /// Frames in which this track was matched or born
    pub hits: u32,
    /// Recent centroids, oldest first
    pub trail: VecDeque<(f32, f32)>,
    pub centroid: (f32, f32),
    /// Index of the input detection this track took in the latest update
    pub detection_index: Option<usize>,
}

impl Track {
    fn new(id: u64, detection: Detection, index: usize, trail_len: usize) -> Self {
        let centroid = detection.bbox.centroid();
        let mut trail = VecDeque::with_capacity(trail_len);
        trail.push_back(centroid);
        Self {
            id,
            object: detection,
            age: 0,
            hits: 1,
            trail,
            centroid,
            detection_index: Some(index),
        }
    }

    fn absorb(&mut self, detection: Detection, index: usize, trail_len: usize) {
        self.centroid = detection.bbox.centroid();
        self.object = detection;
        self.trail.push_back(self.centroid);
        while self.trail.len() > trail_len {
            self.trail.pop_front();
        }
        self.age = 0;
        self.hits = self.hits.saturating_add(1);
        self.detection_index = Some(index);
    }

    pub fn label(&self) -> &str {
        &self.object.label
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.object.bbox
    }

    /// True for the update in which the track was created
    pub fn is_new(&self) -> bool {
        self.hits == 1 && self.age == 0
    }
}

/// Multi-object tracker
#[derive(Debug)]
pub struct ObjectTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl ObjectTracker {
    /// Create a new object tracker
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Update tracker with new detections
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        let trail_len = self.config.trail_len.max(1);

        for track in self.tracks.iter_mut() {
            track.age = track.age.saturating_add(1);
            track.detection_index = None;
        }

        let mut claimed = vec![false; detections.len()];

        for track in self.tracks.iter_mut() {
            let mut best_match: Option<(usize, f32)> = None;

            for (det_idx, detection) in detections.iter().enumerate() {
                if claimed[det_idx] {
                    continue;
                }
                let iou = track.object.bbox.iou(&detection.bbox);
                match best_match {
                    Some((_, best_iou)) if iou <= best_iou => {}
                    _ => best_match = Some((det_idx, iou)),
                }
            }

            if let Some((det_idx, iou)) = best_match {
                if iou >= self.config.iou_threshold && iou > 0.0 {
                    claimed[det_idx] = true;
                    track.absorb(detections[det_idx].clone(), det_idx, trail_len);
                }
            }
        }

        for (det_idx, detection) in detections.iter().enumerate() {
            if claimed[det_idx] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks
                .push(Track::new(id, detection.clone(), det_idx, trail_len));
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|track| track.age < max_age);

        debug!("Tracking {} objects", self.tracks.len());
        self.tracks.clone()
    }

    /// Get all active tracks
    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.clone()
    }

    /// Drop all tracks. IDs keep increasing afterwards.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_detection(class_name: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection::new(
            class_name,
            confidence,
            BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
        )
    }

    #[test]
    fn test_tracker_new() {
        let tracker = ObjectTracker::default();
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_tracker_update_empty() {
        let mut tracker = ObjectTracker::default();
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_tracker_update_single_detection() {
        let mut tracker = ObjectTracker::default();
        let tracks = tracker.update(&[create_detection("person", 0.9, (10.0, 10.0, 50.0, 50.0))]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].label(), "person");
        assert_eq!(tracks[0].age, 0);
        assert_eq!(tracks[0].hits, 1);
        assert_eq!(tracks[0].trail.len(), 1);
        assert_eq!(tracks[0].centroid, (35.0, 35.0));
        assert_eq!(tracks[0].detection_index, Some(0));
        assert!(tracks[0].is_new());
    }

    #[test]
    fn test_tracker_tracking_across_frames() {
        let mut tracker = ObjectTracker::default();

        let tracks1 = tracker.update(&[create_detection("person", 0.9, (10.0, 10.0, 50.0, 50.0))]);
        let track_id = tracks1[0].id;

        let tracks2 = tracker.update(&[create_detection("person", 0.8, (12.0, 12.0, 50.0, 50.0))]);
        assert_eq!(tracks2.len(), 1);
        assert_eq!(tracks2[0].id, track_id);
        assert_eq!(tracks2[0].age, 0);
        assert_eq!(tracks2[0].hits, 2);
        assert_eq!(tracks2[0].object.score, 0.8);
        assert_eq!(tracks2[0].trail.len(), 2);
        assert!(!tracks2[0].is_new());
    }

    #[test]
    fn test_tracker_below_threshold_spawns_new_track() {
        let mut tracker = ObjectTracker::default();
        let first = tracker.update(&[create_detection("cup", 0.9, (0.0, 0.0, 10.0, 10.0))]);

        // IoU = 1/3, below 0.4
        let second = tracker.update(&[create_detection("cup", 0.9, (5.0, 0.0, 10.0, 10.0))]);
        assert_eq!(second.len(), 2);
        assert!(second.iter().any(|t| t.id == first[0].id && t.age == 1));
        assert!(second.iter().any(|t| t.id != first[0].id && t.is_new()));
    }

    #[test]
    fn test_tracker_track_aging() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[create_detection("person", 0.9, (10.0, 10.0, 50.0, 50.0))]);

        for call in 1..15 {
            let tracks = tracker.update(&[]);
            assert_eq!(tracks.len(), 1, "track evicted early at call {}", call);
            assert_eq!(tracks[0].age, call);
            assert_eq!(tracks[0].detection_index, None);
        }

        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_tracker_ids_not_reused() {
        let mut tracker = ObjectTracker::new(TrackerConfig {
            max_age: 1,
            ..TrackerConfig::default()
        });
        let first = tracker.update(&[create_detection("dog", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        assert!(tracker.update(&[]).is_empty());
        let second = tracker.update(&[create_detection("dog", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        assert!(second[0].id > first[0].id);

        tracker.reset();
        let third = tracker.update(&[create_detection("dog", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        assert!(third[0].id > second[0].id);
    }

    #[test]
    fn test_tracker_trail_cap() {
        let mut tracker = ObjectTracker::default();
        let mut tracks = Vec::new();
        for step in 0..25 {
            let x = step as f32;
            tracks = tracker.update(&[create_detection("ball", 0.9, (x, 0.0, 40.0, 40.0))]);
        }
        let trail = &tracks[0].trail;
        assert_eq!(trail.len(), 18);
        let expected: Vec<(f32, f32)> = (7..25).map(|s| (s as f32 + 20.0, 20.0)).collect();
        assert_eq!(trail.iter().copied().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_tracker_first_registered_wins_ties() {
        let mut tracker = ObjectTracker::default();
        // Two tracks with identical boxes
        let first = tracker.update(&[
            create_detection("a", 0.9, (0.0, 0.0, 10.0, 10.0)),
            create_detection("b", 0.9, (0.0, 0.0, 10.0, 10.0)),
        ]);
        let older = first[0].id;
        let younger = first[1].id;

        let tracks = tracker.update(&[create_detection("c", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        let older_track = tracks.iter().find(|t| t.id == older).unwrap();
        let younger_track = tracks.iter().find(|t| t.id == younger).unwrap();
        assert_eq!(older_track.age, 0);
        assert_eq!(older_track.label(), "c");
        assert_eq!(younger_track.age, 1);
    }

    #[test]
    fn test_tracker_no_double_claim() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[
            create_detection("a", 0.9, (0.0, 0.0, 10.0, 10.0)),
            create_detection("b", 0.9, (1.0, 0.0, 10.0, 10.0)),
        ]);
        let tracks = tracker.update(&[create_detection("a", 0.9, (0.5, 0.0, 10.0, 10.0))]);
        let claimed: Vec<usize> = tracks.iter().filter_map(|t| t.detection_index).collect();
        assert_eq!(claimed, vec![0]);
    }

    #[test]
    fn test_tracker_non_finite_detection_spawns_track() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[create_detection("x", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        let tracks = tracker.update(&[create_detection("x", 0.9, (f32::NAN, 0.0, 10.0, 10.0))]);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks.iter().filter(|t| t.is_new()).count(), 1);
    }

    #[test]
    fn test_tracker_snapshot_is_detached() {
        let mut tracker = ObjectTracker::default();
        let mut tracks = tracker.update(&[create_detection("x", 0.9, (0.0, 0.0, 10.0, 10.0))]);
        tracks[0].id = 999;
        tracks.clear();
        assert_eq!(tracker.tracks()[0].id, 1);
    }
}
