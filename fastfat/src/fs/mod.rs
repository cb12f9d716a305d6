//! File System Subsystem
//!
//! File system drivers for Nostalgia OS.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    I/O Manager (IRP_MJ_CLOSE)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FAT driver close path                    │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │  FsdClose   │ │ Close queues│ │ FspClose    │            │
//! │  └─────────────┘ └─────────────┘ └─────────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                      │
//!          ▼                                      ▼
//! ┌─────────────────┐                   ┌─────────────────────┐
//! │  Cache Manager  │                   │  System work queues │
//! └─────────────────┘                   └─────────────────────┘
//! ```

pub mod fastfat;
