//! Progress reporting for ledger runs.
//!
//! Components
//! -----------------
//! * [`PixelProgress`] – Shared completed-pixel counter. Every second completed pixel logs the
//!   running rate at `info` level. With the `progress` feature an `indicatif` bar is drawn
//!   as well.
//! * [`fmt_dur`] – Human-readable formatter for [`Duration`] values, producing strings like
//!   `"253µs"`, `"42ms"`, or `"3.14s"` depending on the scale.
//!
//! The counter is a single atomic, so workers of a pool tick it without locking.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

pub struct PixelProgress {
    done: AtomicUsize,
    npix: u64,
    start: Instant,
    #[cfg(feature = "progress")]
    bar: ProgressBar,
}

impl PixelProgress {
    pub fn new(npix: u64) -> Self {
        #[cfg(feature = "progress")]
        let bar = {
            let pb = ProgressBar::new(npix.max(1));
            pb.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) \
                 | {per_sec} | ETA {eta_precise} | {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.enable_steady_tick(Duration::from_millis(200));
            pb
        };

        Self {
            done: AtomicUsize::new(0),
            npix,
            start: Instant::now(),
            #[cfg(feature = "progress")]
            bar,
        }
    }

    /// Record one completed pixel and return the number completed so far.
    pub fn tick(&self) -> usize {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = self.start.elapsed();

        #[cfg(feature = "progress")]
        {
            self.bar.inc(1);
            self.bar
                .set_message(format!("avg: {}", fmt_dur(elapsed / done as u32)));
        }

        if done % 2 == 0 {
            let secs = elapsed.as_secs_f64();
            info!(
                "{}/{} HEALPixels; {:.1} secs/pixel...t = {:.1} mins",
                done,
                self.npix,
                secs / done as f64,
                secs / 60.0
            );
        }
        done
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(&self) {
        #[cfg(feature = "progress")]
        {
            self.bar.disable_steady_tick();
            self.bar.finish_and_clear();
        }
    }
}

#[inline]
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else {
        let ms = d.as_millis();
        if ms < 1_000 {
            format!("{ms}ms")
        } else {
            let s = d.as_secs_f32();
            format!("{s:.2}s")
        }
    }
}
