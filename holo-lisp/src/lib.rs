//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod config;
pub mod ddt;
pub mod debug;
pub mod error;
pub mod etr;
pub mod events;
pub mod exchange;
pub mod instance;
pub mod map_server;
pub mod network;
pub mod packet;
pub mod tasks;
pub mod tree;
