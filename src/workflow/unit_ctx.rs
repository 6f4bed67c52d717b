//! 单元处理上下文
//!
//! 封装"我正在处理第几个单元"这一信息

use std::fmt::Display;

use crate::models::UnitId;

/// 单元处理上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitCtx {
    pub unit_id: UnitId,

    /// 在本次运行中的位置（从1开始，仅用于日志显示）
    pub position: usize,

    pub total: usize,
}

impl UnitCtx {
    pub fn new(unit_id: UnitId, position: usize, total: usize) -> Self {
        Self {
            unit_id,
            position,
            total,
        }
    }

    pub fn is_last(&self) -> bool {
        self.position >= self.total
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[单元 {}/{} #{}]", self.position, self.total, self.unit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_last() {
        let ctx = UnitCtx::new(9001, 2, 3);
        assert_eq!(ctx.to_string(), "[单元 2/3 #9001]");
        assert!(!ctx.is_last());
        assert!(UnitCtx::new(9002, 3, 3).is_last());
    }
}
