//! Connection implementations
//!
//! - `tcp` - non-blocking `std::net::TcpStream`, watched by poll/epoll
//! - `mock` - in-process pairs driven by the mock backend

pub mod mock;
pub mod tcp;
