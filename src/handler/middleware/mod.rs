pub mod clientip;
