//! Playback queue scheduling tests.

mod common;

use aria_voice::{AudioOutput, PlaybackItem, PlaybackQueue};
use common::MockOutput;
use proptest::prelude::*;

fn item_secs(secs: f64, rate: u32) -> PlaybackItem {
    PlaybackItem::new(vec![0.1; (secs * rate as f64).round() as usize], rate)
}

#[test]
fn test_back_to_back_schedule() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());

    queue.enqueue(item_secs(0.5, 16000));
    queue.enqueue(item_secs(0.25, 16000));
    queue.enqueue(item_secs(1.0, 16000));
    assert_eq!(output.start_count(), 1);
    assert_eq!(queue.queued(), 2);

    output.finish(0);
    output.finish(1);
    output.finish(2);

    let starts: Vec<f64> = output.starts().iter().map(|r| r.start_at).collect();
    assert_eq!(starts, vec![0.0, 0.5, 0.75]);
    assert!(!queue.is_playing());
    assert!(!queue.is_speaking());
}

#[test]
fn test_items_resampled_to_output_rate_when_queued() {
    let output = MockOutput::at_rate(48000);
    let queue = PlaybackQueue::new(output.clone());

    queue.enqueue(item_secs(0.5, 16000));
    queue.enqueue(item_secs(0.25, 48000));
    output.finish(0);

    let starts = output.starts();
    assert_eq!(starts[0].item.sample_rate(), 48000);
    assert_eq!(starts[0].item.samples().len(), 24000);
    assert_eq!(starts[1].item.samples().len(), 12000);
    assert!((starts[1].start_at - 0.5).abs() < 1e-9);
}

#[test]
fn test_late_arrival_starts_at_clock() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());

    queue.enqueue(item_secs(0.5, 16000));
    output.finish(0);

    // Silence gap: the next chunk arrives well after the first finished.
    output.set_time(3.0);
    queue.enqueue(item_secs(0.5, 16000));
    assert_eq!(output.starts()[1].start_at, 3.0);
}

#[test]
fn test_interrupt_resets_cursor() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());

    queue.enqueue(item_secs(2.0, 16000));
    queue.enqueue(item_secs(2.0, 16000));
    output.set_time(0.4);

    queue.interrupt();
    assert_eq!(output.stops(), 1);
    assert_eq!(queue.queued(), 0);
    assert!(!queue.is_playing());
    assert!(!queue.is_speaking());

    queue.enqueue(item_secs(0.5, 16000));
    assert_eq!(output.starts()[1].start_at, 0.4);

    // The interrupted render's completion must not advance the new one.
    output.finish(0);
    assert_eq!(output.start_count(), 2);
    assert!(queue.is_playing());
}

#[test]
fn test_interrupt_when_idle_is_noop() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());
    queue.interrupt();
    assert_eq!(output.stops(), 0);
    assert!(!queue.is_speaking());
}

#[tokio::test]
async fn test_speaking_notifications() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());
    let mut speaking = queue.subscribe();
    assert!(!*speaking.borrow());

    queue.enqueue(item_secs(0.1, 16000));
    speaking.changed().await.unwrap();
    assert!(*speaking.borrow_and_update());

    output.finish(0);
    speaking.changed().await.unwrap();
    assert!(!*speaking.borrow_and_update());
}

#[test]
fn test_stop_discards_later_enqueues() {
    let output = MockOutput::new();
    let queue = PlaybackQueue::new(output.clone());

    queue.enqueue(item_secs(0.5, 16000));
    queue.stop();
    queue.enqueue(item_secs(0.5, 16000));

    assert_eq!(output.start_count(), 1);
    assert_eq!(queue.queued(), 0);
    assert!(!queue.is_playing());
}

proptest! {
    /// Renders never overlap and leave no gap while the queue stays non-empty.
    #[test]
    fn prop_no_overlap_no_gap(lengths in prop::collection::vec(1usize..8000, 1..6)) {
        let output = MockOutput::new();
        let queue = PlaybackQueue::new(output.clone());
        let rate = 16000;

        for len in &lengths {
            queue.enqueue(PlaybackItem::new(vec![0.0; *len], rate));
        }
        for i in 0..lengths.len() {
            output.finish(i);
        }

        let starts = output.starts();
        prop_assert_eq!(starts.len(), lengths.len());
        let mut expected = 0.0;
        for (request, len) in starts.iter().zip(&lengths) {
            prop_assert!((request.start_at - expected).abs() < 1e-9);
            expected += *len as f64 / rate as f64;
        }
        prop_assert!((output.current_time() - expected).abs() < 1e-9);
    }
}
