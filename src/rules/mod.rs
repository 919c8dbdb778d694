//! Rule modules ship as plain functions that build a [`crate::task::Task`];
//! this crate carries one worked example, not a framework for authoring them.

pub mod douban_book;
