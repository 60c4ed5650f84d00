//! 라우터 매니저 모듈
//!
//! 리로드마다 라우터를 순회하며 엔트리포인트/프로토콜로 거르고, 규칙을
//! 컴파일하고, 서비스와 미들웨어 참조를 해석해 엔트리포인트당 핸들러
//! 하나를 만듭니다. 이 핸들러가 원자적 스왑의 단위입니다.

mod manager;
mod tcp;

pub use manager::{build_entry_point_handlers, EntryPointHandler, RouteEntry};
pub use tcp::{build_tcp_handlers, TcpRouteEntry, TcpRouterTree, TcpServiceHandler};
