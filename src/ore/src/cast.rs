// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cast utilities.

/// A trait for safe, simple, and infallible casts.
///
/// `CastFrom` is like [`std::convert::From`], but it is implemented for some
/// platform-specific casts that are missing from the standard library. For
/// example, there is no `From<usize> for u64` implementation, because Rust may
/// someday support platforms where usize is wider than 64 bits. Since we
/// only build for 64-bit targets, we are happy to provide one.
///
/// `CastFrom` should be preferred to the `as` operator, since the `as` operator
/// will silently truncate if the target type is smaller than the source type.
pub trait CastFrom<T> {
    /// Performs the cast.
    fn cast_from(from: T) -> Self;
}

macro_rules! cast_from {
    ($from:ty, $to:ty) => {
        impl CastFrom<$from> for $to {
            #[allow(clippy::as_conversions)]
            fn cast_from(from: $from) -> $to {
                from as $to
            }
        }
    };
}

#[cfg(target_pointer_width = "64")]
cast_from!(usize, u64);

/// A trait for casts that may lose precision, such as integer to float.
///
/// Counters and throughput figures are reported as `f64`, and the loss of
/// precision above 2^53 is irrelevant at the scale of a benchmark run.
pub trait CastLossy<T> {
    /// Performs the (possibly lossy) cast.
    fn cast_lossy(from: T) -> Self;
}

macro_rules! cast_lossy {
    ($from:ty, $to:ty) => {
        impl CastLossy<$from> for $to {
            #[allow(clippy::as_conversions)]
            fn cast_lossy(from: $from) -> $to {
                from as $to
            }
        }
    };
}

cast_lossy!(usize, f64);
cast_lossy!(u64, f64);
// Float to integer casts saturate, and NaN becomes zero.
cast_lossy!(f64, u64);
