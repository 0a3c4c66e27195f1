//! Tests for the priority buffer: ordering, admission, blocking reads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use logfunnel::level::LogLevel;
use logfunnel::priority_buffer::{PriorityBuffer, DEFAULT_CAPACITY_BYTES};
use logfunnel::record::Record;

fn base_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

/// Record timestamped `offset_ms` after the base instant.
fn record_at(offset_ms: i64, message: &str) -> Record {
    Record::with_timestamp(
        LogLevel::Warn,
        1,
        "test",
        message,
        base_time() + chrono::Duration::milliseconds(offset_ms),
    )
}

/// Record whose accounted size is exactly `bytes`.
fn record_sized(bytes: usize, offset_ms: i64) -> Record {
    let overhead = record_at(offset_ms, "").accounted_size();
    assert!(bytes >= overhead, "requested size below record overhead");
    record_at(offset_ms, &"x".repeat(bytes - overhead))
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_delivers_earliest_timestamp_first() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    assert!(buffer.enqueue(record_at(0, "t")));
    assert!(buffer.enqueue(record_at(-5, "t-5ms")));
    assert!(buffer.enqueue(record_at(2, "t+2ms")));

    assert_eq!(buffer.dequeue().unwrap().message(), "t-5ms");
    assert_eq!(buffer.dequeue().unwrap().message(), "t");
    assert_eq!(buffer.dequeue().unwrap().message(), "t+2ms");
}

#[test]
fn test_timestamp_ties_deliver_in_admission_order() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    for i in 0..5 {
        assert!(buffer.enqueue(record_at(0, &format!("tie-{i}"))));
    }
    for i in 0..5 {
        assert_eq!(buffer.dequeue().unwrap().message(), format!("tie-{i}"));
    }
}

#[test]
fn test_dequeue_batch_respects_priority_order() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    for offset in [30, 10, 50, 20, 40] {
        assert!(buffer.enqueue(record_at(offset, &format!("m{offset}"))));
    }

    let first = buffer.dequeue_batch(3);
    let messages: Vec<_> = first.iter().map(|r| r.message().to_string()).collect();
    assert_eq!(messages, ["m10", "m20", "m30"]);

    let rest = buffer.dequeue_batch(10);
    let messages: Vec<_> = rest.iter().map(|r| r.message().to_string()).collect();
    assert_eq!(messages, ["m40", "m50"]);
}

// ============================================================================
// Admission and accounting
// ============================================================================

#[test]
fn test_rejects_third_record_when_sized_for_two() {
    let size = record_sized(512, 0).accounted_size();
    let buffer = PriorityBuffer::new(2 * size);

    assert!(buffer.enqueue(record_sized(512, 0)));
    assert!(buffer.enqueue(record_sized(512, 1)));
    assert!(!buffer.enqueue(record_sized(512, 2)));

    let drained = buffer.dequeue_batch(10);
    assert_eq!(drained.len(), 2);
}

#[test]
fn test_rejects_record_larger_than_capacity() {
    let buffer = PriorityBuffer::new(256);
    assert!(!buffer.enqueue(record_sized(512, 0)));
    assert_eq!(buffer.size(), 0);
    assert_eq!(buffer.used_bytes(), 0);
}

#[test]
fn test_used_bytes_equals_sum_of_accounted_sizes() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    let records = [
        record_at(0, "short"),
        record_at(1, "a somewhat longer message"),
        record_at(2, ""),
    ];
    let expected: usize = records.iter().map(Record::accounted_size).sum();
    for record in records {
        assert!(buffer.enqueue(record));
    }
    assert_eq!(buffer.used_bytes(), expected);

    buffer.dequeue().unwrap();
    buffer.dequeue().unwrap();
    buffer.dequeue().unwrap();
    assert_eq!(buffer.used_bytes(), 0);
}

#[test]
fn test_enqueue_batch_counts_admissions() {
    let size = record_sized(512, 0).accounted_size();
    let buffer = PriorityBuffer::new(2 * size);
    let batch = vec![
        record_sized(512, 0),
        record_sized(512, 1),
        record_sized(512, 2),
    ];
    assert_eq!(buffer.enqueue_batch(batch), 2);
    assert_eq!(buffer.size(), 2);
}

#[test]
fn test_reset_discards_everything() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    buffer.enqueue(record_at(0, "a"));
    buffer.enqueue(record_at(1, "b"));
    buffer.reset();
    assert_eq!(buffer.size(), 0);
    assert_eq!(buffer.used_bytes(), 0);
}

// ============================================================================
// Overload probe
// ============================================================================

#[test]
fn test_is_overloaded_compares_used_fraction() {
    let size = record_sized(1000, 0).accounted_size();
    let buffer = PriorityBuffer::new(10 * size);
    for i in 0..7 {
        assert!(buffer.enqueue(record_sized(1000, i)));
    }
    assert!(buffer.is_overloaded(0.6));
    assert!(!buffer.is_overloaded(0.8));
}

#[test]
fn test_empty_buffer_is_not_overloaded() {
    let buffer = PriorityBuffer::new(1024);
    assert!(!buffer.is_overloaded(0.0));
}

// ============================================================================
// Blocking and shutdown
// ============================================================================

#[test]
fn test_dequeue_blocks_until_enqueue() {
    let buffer = Arc::new(PriorityBuffer::new(DEFAULT_CAPACITY_BYTES));
    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            buffer.enqueue(record_at(0, "late arrival"));
        })
    };

    let record = buffer.dequeue().expect("dequeue should yield the record");
    assert_eq!(record.message(), "late arrival");
    producer.join().unwrap();
}

#[test]
fn test_shutdown_wakes_blocked_reader() {
    let buffer = Arc::new(PriorityBuffer::new(DEFAULT_CAPACITY_BYTES));
    let reader = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || buffer.dequeue())
    };

    thread::sleep(Duration::from_millis(50));
    buffer.shutdown();
    assert!(reader.join().unwrap().is_none());
    assert!(buffer.is_shut_down());
}

#[test]
fn test_shutdown_still_drains_remaining_records() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    buffer.enqueue(record_at(0, "a"));
    buffer.enqueue(record_at(1, "b"));
    buffer.shutdown();

    assert!(buffer.dequeue().is_some());
    assert!(buffer.dequeue().is_some());
    assert!(buffer.dequeue().is_none());
}

#[test]
fn test_dequeue_batch_returns_empty_after_shutdown() {
    let buffer = PriorityBuffer::new(DEFAULT_CAPACITY_BYTES);
    buffer.shutdown();
    assert!(buffer.dequeue_batch(20).is_empty());
}

// ============================================================================
// Concurrent load
// ============================================================================

#[test]
fn test_concurrent_producers_and_reader() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 200;

    let buffer = Arc::new(PriorityBuffer::new(DEFAULT_CAPACITY_BYTES));
    let capacity = buffer.capacity_bytes();

    let reader = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut seen = 0usize;
            loop {
                let batch = buffer.dequeue_batch(16);
                if batch.is_empty() {
                    break;
                }
                seen += batch.len();
            }
            seen
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let record = record_at((p * PER_PRODUCER + i) as i64, "payload");
                    assert!(buffer.enqueue(record));
                    let used = buffer.used_bytes();
                    assert!(used <= capacity);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    buffer.shutdown();

    let seen = reader.join().unwrap();
    assert_eq!(seen, PRODUCERS * PER_PRODUCER);
    assert_eq!(buffer.used_bytes(), 0);
    assert_eq!(buffer.size(), 0);
}
