pub mod app;
pub mod callconfig;
pub mod config;
pub mod controller;
pub mod deeplink;
pub mod device;
pub mod directory;
pub mod event;
pub mod handler;
pub mod token;
pub mod twiml;
pub mod version;
pub mod view;
pub mod widget;
