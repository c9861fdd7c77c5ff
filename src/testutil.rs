// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Shared helpers for unit tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::store::{
    MemorySoundStore, SoundRecord, SoundStore, SoundSummary, StoreError, UNSET_END_TIME,
};

/// Builds a 32-bit float WAV file in memory. Every channel carries a ramp
/// from -1.0 towards 1.0.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(
            Cursor::new(&mut bytes),
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .expect("failed to create wav writer");

        for frame in 0..frames {
            let value = -1.0 + 2.0 * frame as f32 / frames as f32;
            for _ in 0..channels {
                writer.write_sample(value).expect("failed to write sample");
            }
        }
        writer.finalize().expect("failed to finalize wav");
    }
    bytes
}

/// A stored record with a decodable blob.
pub fn record(id: &str, duration_secs: f64) -> SoundRecord {
    SoundRecord {
        id: id.to_string(),
        name: None,
        blob: wav_bytes(8000, 1, (8000.0 * duration_secs) as usize),
        start_time: 0.0,
        end_time: UNSET_END_TIME,
        volume: 1.0,
        fade_in: None,
        fade_out: None,
        updated_at: 1,
    }
}

/// A store that counts reads and can hold them until permits are released.
pub struct GatedStore {
    inner: MemorySoundStore,
    gets: AtomicUsize,
    gets_by_id: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

impl GatedStore {
    /// A store that answers immediately.
    pub fn open(records: impl IntoIterator<Item = SoundRecord>) -> GatedStore {
        GatedStore {
            inner: MemorySoundStore::with_records(records),
            gets: AtomicUsize::new(0),
            gets_by_id: Mutex::new(Vec::new()),
            gate: None,
            fail: false,
        }
    }

    /// A store whose reads wait for a permit on the returned semaphore.
    pub fn gated(records: impl IntoIterator<Item = SoundRecord>) -> (GatedStore, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut store = GatedStore::open(records);
        store.gate = Some(gate.clone());
        (store, gate)
    }

    /// A store whose reads always fail.
    pub fn failing() -> GatedStore {
        let mut store = GatedStore::open(Vec::new());
        store.fail = true;
        store
    }

    /// Total number of reads.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of reads for the given id.
    pub fn gets_for(&self, id: &str) -> usize {
        self.gets_by_id
            .lock()
            .iter()
            .filter(|read| read.as_str() == id)
            .count()
    }
}

impl SoundStore for GatedStore {
    async fn get(&self, id: &str) -> Result<Option<SoundRecord>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.gets_by_id.lock().push(id.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.fail {
            return Err(StoreError::Io(std::io::Error::other("store offline")));
        }
        self.inner.get(id).await
    }

    async fn put(&self, record: SoundRecord) -> Result<(), StoreError> {
        self.inner.put(record).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<SoundSummary>, StoreError> {
        self.inner.list().await
    }
}

/// Wait for the given async predicate to return true or fail.
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("system time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate().await {
            return;
        }
        tokio::time::sleep(tick).await;
    }
}
