#![allow(dead_code)]

pub mod embedder;
pub mod http;
pub mod wav;
