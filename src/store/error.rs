// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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

/// Typed error for sound store failures. A missing record is not an error;
/// stores report it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Sound store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sound record format error: {0}")]
    Format(#[from] serde_yml::Error),

    #[error("Invalid sound id '{0}'")]
    InvalidId(String),

    #[error("Sound is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}
