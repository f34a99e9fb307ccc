// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP boundary: the auth wire client and the outbound request pipeline.

pub mod auth_api;
pub mod pipeline;
