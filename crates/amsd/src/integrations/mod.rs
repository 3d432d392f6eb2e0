pub mod ams;
