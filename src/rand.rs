//! Pseudo random number generation for the contention manager and for
//! transactional workloads.
//!
//! Two fixed-seed generators from the xoshiro/xoroshiro family
//! (<https://prng.di.unimi.it/>):
//!
//! - [`Xoroshiro128pp`] — the small per-engine generator embedded in each
//!   transaction engine. Engines decorrelate at thread init by jumping a
//!   thread-dependent number of times, so no locking is needed on the hot
//!   path.
//! - [`Xoshiro512pp`] — a larger-period generator behind [`next_u64`]. A
//!   single root instance is shared process-wide; each thread copies the
//!   root state and advances the root by one `jump` under a mutex, giving
//!   every thread a non-overlapping stream.

use core::cell::RefCell;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

#[inline]
fn rotl(x: u64, k: u32) -> u64 {
    (x << k) | (x >> (64 - k))
}

/// xoroshiro128++ with the fixed seed used by every engine before
/// decorrelation.
#[derive(Clone)]
pub(crate) struct Xoroshiro128pp {
    s: [u64; 2],
}

impl Xoroshiro128pp {
    pub(crate) const fn new() -> Self {
        Self {
            s: [0xdad6490a0e036cbf, 0x282ef0c42968addc],
        }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let s0 = self.s[0];
        let mut s1 = self.s[1];
        let result = rotl(s0.wrapping_add(s1), 17).wrapping_add(s0);

        s1 ^= s0;
        self.s[0] = rotl(s0, 49) ^ s1 ^ (s1 << 21);
        self.s[1] = rotl(s1, 28);

        result
    }

    /// Advance the state by 2^64 steps. Streams produced before and after a
    /// jump never overlap.
    pub(crate) fn jump(&mut self) {
        const JUMP: [u64; 2] = [0x2bd7a6a6e99c2ddc, 0x0992ccaf6a6fca05];

        let mut s0 = 0u64;
        let mut s1 = 0u64;
        for word in JUMP {
            for b in 0..64 {
                if word & (1u64 << b) != 0 {
                    s0 ^= self.s[0];
                    s1 ^= self.s[1];
                }
                self.next();
            }
        }

        self.s = [s0, s1];
    }
}

/// xoshiro512++ holding the 8x64-bit root state.
#[derive(Clone)]
struct Xoshiro512pp {
    s: [u64; 8],
}

impl Xoshiro512pp {
    const fn new() -> Self {
        Self {
            s: [
                0xed114a1b1329f214,
                0x1b427ba78e4b653d,
                0xfce4fff14ee4f6b8,
                0x12e92ae6e6d06e93,
                0x0024f3617b58cad1,
                0xc4322d77c43148b3,
                0x212a99a34d466ac7,
                0x785347b3b1c0e816,
            ],
        }
    }

    fn next(&mut self) -> u64 {
        let s = &mut self.s;
        let result = rotl(s[0].wrapping_add(s[2]), 17).wrapping_add(s[2]);

        let t = s[1] << 11;

        s[2] ^= s[0];
        s[5] ^= s[1];
        s[1] ^= s[2];
        s[7] ^= s[3];
        s[3] ^= s[4];
        s[4] ^= s[5];
        s[0] ^= s[6];
        s[6] ^= s[7];

        s[6] ^= t;

        s[7] = rotl(s[7], 21);

        result
    }

    /// Advance the state by 2^256 steps.
    fn jump(&mut self) {
        const JUMP: [u64; 8] = [
            0x33ed89b6e7a353f9,
            0x760083d7955323be,
            0x2837f2fbb5f22fae,
            0x4b8c5674d309511c,
            0xb11ac47a7ba28c25,
            0xf1be7667092bcc1c,
            0x53851efdb6df0aaf,
            0x1ebbc8b23eaf25db,
        ];

        let mut t = [0u64; 8];
        for word in JUMP {
            for b in 0..64 {
                if word & (1u64 << b) != 0 {
                    for (acc, s) in t.iter_mut().zip(self.s.iter()) {
                        *acc ^= *s;
                    }
                }
                self.next();
            }
        }

        self.s = t;
    }

    /// Copy the root stream for this thread, then jump the root so the next
    /// thread gets a disjoint stream.
    fn from_root() -> Self {
        let mut root = ROOT.lock();
        let copy = root.clone();
        root.jump();
        copy
    }
}

static ROOT: Lazy<Mutex<Xoshiro512pp>> = Lazy::new(|| Mutex::new(Xoshiro512pp::new()));

thread_local! {
    static THREAD_RNG: RefCell<Xoshiro512pp> = RefCell::new(Xoshiro512pp::from_root());
}

/// Uniform 64-bit value from the calling thread's generator.
///
/// The root generator is only touched (under a mutex) the first time a thread
/// calls this; afterwards the thread-local stream is lock-free.
pub fn next_u64() -> u64 {
    THREAD_RNG.with(|rng| rng.borrow_mut().next())
}
