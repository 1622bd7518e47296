// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Implementations of [PositionSource](crate::tracker::PositionSource).

mod nmea_stream;
mod simulated;

pub use self::nmea_stream::NmeaSource;
pub use self::simulated::SimulatedSource;
