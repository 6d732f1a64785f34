// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQL query implementations, one module per table-ish concern.

pub mod conversations;
pub mod entities;
pub mod messages;
pub mod users;
