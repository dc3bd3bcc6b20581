//! 外部通道集成

pub mod web;
pub mod whatsapp;
