// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// Time source boundary for UTC timestamps.
/// Run names, staging directories and metadata timestamps all derive from it,
/// so tests can pin them.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    fn unix_seconds(&self) -> i64 {
        self.now_utc().unix_timestamp()
    }
}
