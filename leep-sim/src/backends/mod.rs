pub mod regfile;
pub mod rfs;
