//! Per-level stripe layout
//!
//! Turns a stripe payload plus a scheduler selection into the ordered
//! block set to be written, and provides the parity math used both when
//! encoding and when recovering a lost block.

use stripeio_common::{BlockRole, Error, FileId, RaidLevel, Result};
use stripeio_scheduler::Selection;

/// One block ready to be dispatched to a driver
#[derive(Clone, Debug)]
pub(crate) struct BlockPlan {
    pub strip_index: usize,
    pub driver_name: String,
    pub storage_id: String,
    pub role: BlockRole,
    pub payload: Vec<u8>,
}

/// Build the ordered block set for one stripe.
///
/// Block indices are dense in emission order; for RAID 5 the parity block
/// sits at the position the selection designates.
pub(crate) fn plan_stripe(
    level: RaidLevel,
    file_id: &FileId,
    stripe_index: usize,
    payload: &[u8],
    selection: &Selection,
) -> Result<Vec<BlockPlan>> {
    let drivers = &selection.drivers;
    match level {
        RaidLevel::Zero => {
            let chunks = split_ceil(payload, drivers.len());
            Ok(chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| BlockPlan {
                    strip_index: i,
                    driver_name: drivers[i].clone(),
                    storage_id: format!("{file_id}_s{stripe_index}_st{i}"),
                    role: BlockRole::Data,
                    payload: chunk,
                })
                .collect())
        }
        RaidLevel::One => Ok(drivers
            .iter()
            .enumerate()
            .map(|(i, driver)| BlockPlan {
                strip_index: i,
                driver_name: driver.clone(),
                storage_id: format!("{file_id}_s{stripe_index}_{driver}"),
                role: BlockRole::Mirror,
                payload: payload.to_vec(),
            })
            .collect()),
        RaidLevel::Five => {
            let width = drivers.len();
            let parity_index = selection
                .parity_index
                .ok_or_else(|| Error::internal("RAID 5 selection without a parity position"))?;
            if parity_index >= width {
                return Err(Error::internal(format!(
                    "parity position {parity_index} outside stripe of width {width}"
                )));
            }

            let data_chunks = split_floor(payload, width - 1);
            let parity = xor_parity(&data_chunks);

            let mut plans = Vec::with_capacity(width);
            for i in 0..width {
                let driver = &drivers[i];
                let (role, chunk) = if i == parity_index {
                    (BlockRole::Parity, parity.clone())
                } else {
                    let data_index = if i > parity_index { i - 1 } else { i };
                    (BlockRole::Data, data_chunks[data_index].clone())
                };
                let tag = if role.is_parity() { "parity" } else { "data" };
                plans.push(BlockPlan {
                    strip_index: i,
                    driver_name: driver.clone(),
                    storage_id: format!("{file_id}_s{stripe_index}_{tag}_{driver}"),
                    role,
                    payload: chunk,
                });
            }
            Ok(plans)
        }
        RaidLevel::Ten => {
            let width = drivers.len();
            if width % 2 != 0 {
                return Err(Error::internal(format!(
                    "RAID 10 selection of odd width {width}"
                )));
            }
            let pair_count = width / 2;
            let chunks = split_floor(payload, pair_count);

            let mut plans = Vec::with_capacity(width);
            for (pair_index, chunk) in chunks.iter().enumerate() {
                for member in 0..2 {
                    let strip_index = pair_index * 2 + member;
                    let driver = &drivers[strip_index];
                    plans.push(BlockPlan {
                        strip_index,
                        driver_name: driver.clone(),
                        storage_id: format!(
                            "{file_id}_s{stripe_index}_pair{pair_index}_{driver}"
                        ),
                        role: BlockRole::Mirror,
                        payload: chunk.clone(),
                    });
                }
            }
            Ok(plans)
        }
    }
}

/// Split into up to `parts` chunks of ceil(len / parts) bytes.
///
/// The tail chunk is clamped to the remaining bytes; a payload shorter
/// than `parts` yields fewer chunks rather than empty ones.
pub(crate) fn split_ceil(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let chunk_len = data.len().div_ceil(parts);
    let mut chunks = Vec::with_capacity(parts);
    for i in 0..parts {
        let start = i * chunk_len;
        if start >= data.len() {
            break;
        }
        let end = (start + chunk_len).min(data.len());
        chunks.push(data[start..end].to_vec());
    }
    chunks
}

/// Split into exactly `parts` chunks of floor(len / parts) bytes, with the
/// last chunk absorbing the remainder.
pub(crate) fn split_floor(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let base = data.len() / parts;
    let mut chunks = Vec::with_capacity(parts);
    for i in 0..parts {
        let start = i * base;
        let end = if i == parts - 1 { data.len() } else { start + base };
        chunks.push(data[start..end].to_vec());
    }
    chunks
}

/// XOR over chunks, each conceptually right-padded with zeroes to the
/// longest chunk's length
pub(crate) fn xor_parity(chunks: &[Vec<u8>]) -> Vec<u8> {
    let max_len = chunks.iter().map(Vec::len).max().unwrap_or(0);
    let mut parity = vec![0u8; max_len];
    for chunk in chunks {
        for (p, b) in parity.iter_mut().zip(chunk.iter()) {
            *p ^= b;
        }
    }
    parity
}

/// XOR `chunk` into `acc` in place, extending `acc` if the chunk is longer
pub(crate) fn xor_into(acc: &mut Vec<u8>, chunk: &[u8]) {
    if chunk.len() > acc.len() {
        acc.resize(chunk.len(), 0);
    }
    for (a, b) in acc.iter_mut().zip(chunk.iter()) {
        *a ^= b;
    }
}
