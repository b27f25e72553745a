use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use rentd::engine::{Engine, EngineError};
use rentd::model::{DateRange, ReservationDraft};
use rentd::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn bench_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("rentd_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path: PathBuf = dir.join("reservations.wal");
    Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).expect("open engine"))
}

/// `days`-long range starting `offset` days after 2030-01-01.
fn slot(offset: i64, days: i64) -> DateRange {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid base date");
    let start = base + chrono::Duration::days(offset);
    DateRange::new(start, start + chrono::Duration::days(days - 1))
}

fn draft(vehicle_id: Ulid, range: DateRange) -> ReservationDraft {
    ReservationDraft {
        vehicle_id,
        renter_id: Ulid::new(),
        range,
        daily_rate: 5_000,
        extras: vec![],
        pickup_location: None,
        dropoff_location: None,
        confirm_immediately: true,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let vid = Ulid::new();
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_reservation(draft(vid, slot(i as i64 * 2, 2)))
            .await
            .expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>) {
    let n_tasks = 50;
    let n_per_task = 200;
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let vid = Ulid::new();
            let mut latencies = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let t = Instant::now();
                engine
                    .create_reservation(draft(vid, slot(j as i64 * 3, 3)))
                    .await
                    .expect("concurrent create");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.expect("writer task"));
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} vehicles x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency (group commit)", &mut latencies);
}

async fn phase3_contention(engine: &Arc<Engine>) {
    let vid = Ulid::new();
    let n_tasks = 64;
    let start = Instant::now();

    // every task fights for the same week
    let handles: Vec<_> = (0..n_tasks)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let t = Instant::now();
                let result = engine.create_reservation(draft(vid, slot(0, 7))).await;
                (result, t.elapsed())
            })
        })
        .collect();

    let mut winners = 0;
    let mut conflicts = 0;
    let mut latencies = Vec::with_capacity(n_tasks);
    for h in handles {
        let (result, elapsed) = h.await.expect("contender task");
        match result {
            Ok(_) => winners += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
        latencies.push(elapsed);
    }

    println!(
        "  {n_tasks} contenders in {:.2}ms: {winners} won, {conflicts} conflicts",
        start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(winners, 1, "double booking under contention");
    print_latency("contended create latency", &mut latencies);
}

async fn phase4_read_under_load(engine: &Arc<Engine>) {
    let vid = Ulid::new();
    for i in 0..200 {
        engine
            .create_reservation(draft(vid, slot(i * 4, 2)))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let wvid = Ulid::new();
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) && i < 20_000 {
                let _ = engine.create_reservation(draft(wvid, slot(i, 1))).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let window = slot(((r * reads_per_reader + i) % 700) as i64, 90);
                let t = Instant::now();
                engine
                    .free_ranges(vid, window)
                    .await
                    .expect("free ranges");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in reader_handles {
        latencies.extend(h.await.expect("reader task"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("free_ranges latency", &mut latencies);
}

async fn phase5_compaction(engine: &Arc<Engine>) {
    let appends = engine.wal_appends_since_compact().await;
    let start = Instant::now();
    engine.compact_wal().await.expect("compaction");
    println!(
        "  compacted {appends} appends in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    runtime.block_on(async {
        println!("=== rentd stress benchmark ===\n");
        let engine = bench_engine();

        println!("[phase 1] sequential create throughput");
        phase1_sequential(&engine).await;

        println!("\n[phase 2] concurrent create throughput");
        phase2_concurrent(&engine).await;

        println!("\n[phase 3] contention on one vehicle");
        phase3_contention(&engine).await;

        println!("\n[phase 4] read latency under write load");
        phase4_read_under_load(&engine).await;

        println!("\n[phase 5] WAL compaction");
        phase5_compaction(&engine).await;

        println!("\n=== benchmark complete ===");
    });
}
