//! Demo wiring the four primitives into a small telemetry pipeline: pooled
//! scratch frames feed a shared byte buffer, a bag tracks in-flight frame
//! tags, and a mirror publishes the latest aggregate to readers.

use petek::{Bag, Buffer, Image, Mirror, Pool, Wrapper, YieldingWait};
use std::thread;

#[derive(Clone, Copy, Default)]
struct Stats {
    frames: u64,
    bytes: u64,
}

impl Image for Stats {
    fn mirror_from(&mut self, other: &Self) {
        self.frames = other.frames;
        self.bytes = other.bytes;
    }
}

fn main() {
    const FRAMES: usize = 1000;
    const FRAME_LEN: usize = 32;

    // Scratch frames live in an arena; the pool recycles them.
    let frames: Vec<Wrapper<[u8; FRAME_LEN]>> =
        (0..8).map(|_| Wrapper::new([0; FRAME_LEN])).collect();
    let pool = Pool::new();
    for f in &frames {
        pool.release(f);
    }

    let tags: Vec<u8> = (0..8).collect();
    let buf = Buffer::new(10);
    let in_flight = Bag::new();
    let stats = Mirror::new(Stats::default());

    thread::scope(|scope| {
        // Producer: acquire a frame, fill it, ship it, recycle it.
        let producer = {
            let (pool, buf, in_flight, tags) = (&pool, &buf, &in_flight, &tags);
            scope.spawn(move || {
                for i in 0..FRAMES {
                    let frame = loop {
                        match pool.acquire() {
                            Some(f) => break f,
                            None => thread::yield_now(),
                        }
                    };
                    let tag = (i % tags.len()) as u8;
                    let _ = in_flight.store(&tags[tag as usize]);

                    let payload = [tag; FRAME_LEN];
                    let mut off = 0;
                    while off < payload.len() {
                        let n = buf.put_with(&payload[off..], &YieldingWait);
                        if n == 0 {
                            thread::yield_now();
                        }
                        off += n;
                    }
                    pool.release(frame);
                }
            })
        };

        // Consumer: drain the buffer, retire tags, publish running totals.
        let consumer = {
            let (buf, in_flight, stats) = (&buf, &in_flight, &stats);
            scope.spawn(move || {
                let mut totals = Stats::default();
                let mut dest = [0u8; 1024];
                while totals.bytes < (FRAMES * FRAME_LEN) as u64 {
                    let n = buf.get(&mut dest);
                    if n == 0 {
                        thread::yield_now();
                        continue;
                    }
                    totals.bytes += n as u64;
                    totals.frames = totals.bytes / FRAME_LEN as u64;
                    while in_flight.remove().is_some() {}
                    stats.write(&totals);
                }
            })
        };

        // Observer: snapshot progress while the pipeline runs.
        {
            let stats = &stats;
            scope.spawn(move || {
                let mut snap = Stats::default();
                while snap.frames < FRAMES as u64 {
                    stats.read(&mut snap);
                    thread::yield_now();
                }
                println!("observer saw {} frames / {} bytes", snap.frames, snap.bytes);
            });
        }

        producer.join().unwrap();
        consumer.join().unwrap();
    });

    let mut snap = Stats::default();
    stats.read(&mut snap);
    assert_eq!(snap.frames, FRAMES as u64);
    assert_eq!(snap.bytes, (FRAMES * FRAME_LEN) as u64);
    println!(
        "pipeline done: {} frames, {} bytes, {} tags left in flight",
        snap.frames,
        snap.bytes,
        in_flight.len()
    );
}
