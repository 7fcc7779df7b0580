#![allow(dead_code)]

pub mod args;
pub mod failure;
