pub mod invoice;
pub mod lnurl;
pub mod psbt;
