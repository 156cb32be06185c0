/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */
pub mod auth;
#[allow(clippy::module_inception)]
pub mod lan;
pub mod rmcp;

pub use lan::LanIntf;
