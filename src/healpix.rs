//! # HEALPix (NESTED) bucket indexing
//!
//! Ledgers are partitioned on the sky with the **Hierarchical Equal Area isoLatitude
//! Pixelization** in the NESTED ordering. Only the two operations needed to enumerate and
//! fill buckets are provided:
//!
//! * [`nside2npix`] – number of pixels at a resolution (`12·nside²`),
//! * [`ang2pix_nest`] – pixel containing an (RA, Dec) position.
//!
//! `nside` must be a power of two (NESTED scheme).
//!
//! Conventions
//! -----------------
//! * Positions are equatorial **degrees**: `ra ∈ [0, 360)`, `dec ∈ [-90, 90]`.
//! * The colatitude is `θ = 90° − dec`, the longitude `φ = ra`.
use std::f64::consts::FRAC_PI_2;

use crate::constants::{Degree, PixNum};
use crate::mtl_errors::MtlError;

/// Check that `nside` is a valid NESTED resolution and return its order (`log2(nside)`).
pub fn nside2order(nside: u32) -> Result<u32, MtlError> {
    if nside == 0 || !nside.is_power_of_two() || nside > (1 << 29) {
        return Err(MtlError::InvalidNside(nside));
    }
    Ok(nside.trailing_zeros())
}

/// Number of pixels at resolution `nside`.
pub fn nside2npix(nside: u32) -> Result<u64, MtlError> {
    nside2order(nside)?;
    Ok(12 * (nside as u64) * (nside as u64))
}

/// Interleave the bits of `v` with zeros (`abc` → `0a0b0c`).
#[inline]
fn spread_bits(v: u64) -> u64 {
    let mut x = v & 0x0000_0000_FFFF_FFFF;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

#[inline]
fn xyf2nest(ix: u64, iy: u64, face: u64, order: u32) -> PixNum {
    (face << (2 * order)) + spread_bits(ix) + (spread_bits(iy) << 1)
}

/// NESTED pixel containing the position `(ra, dec)`.
///
/// Arguments
/// -----------------
/// * `nside`: Resolution (power of two).
/// * `ra`: Right ascension in **degrees** (any value, wrapped to `[0, 360)`).
/// * `dec`: Declination in **degrees**, clamped to `[-90, 90]`.
///
/// Return
/// ----------
/// * The pixel number in `0..nside2npix(nside)`.
pub fn ang2pix_nest(nside: u32, ra: Degree, dec: Degree) -> Result<PixNum, MtlError> {
    let order = nside2order(nside)?;
    let ns = nside as i64;

    let z = dec.clamp(-90.0, 90.0).to_radians().sin();
    let za = z.abs();
    // tt ∈ [0, 4): longitude in units of π/2
    let tt = (ra.to_radians() / FRAC_PI_2).rem_euclid(4.0);

    let (face, ix, iy) = if za <= 2.0 / 3.0 {
        // Equatorial region
        let temp1 = ns as f64 * (0.5 + tt);
        let temp2 = ns as f64 * (z * 0.75);
        let jp = (temp1 - temp2) as i64;
        let jm = (temp1 + temp2) as i64;
        let ifp = jp >> order;
        let ifm = jm >> order;
        let face = if ifp == ifm {
            ifp | 4
        } else if ifp < ifm {
            ifp
        } else {
            ifm + 8
        };
        let ix = jm & (ns - 1);
        let iy = ns - (jp & (ns - 1)) - 1;
        (face, ix, iy)
    } else {
        // Polar caps
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = ns as f64 * (3.0 * (1.0 - za)).sqrt();
        let jp = ((tp * tmp) as i64).min(ns - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(ns - 1);
        if z >= 0.0 {
            (ntt, ns - jm - 1, ns - jp - 1)
        } else {
            (ntt + 8, jp, jm)
        }
    };

    Ok(xyf2nest(ix as u64, iy as u64, face as u64, order))
}
