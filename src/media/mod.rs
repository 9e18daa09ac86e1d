pub mod rtcp;
pub mod rtp;
