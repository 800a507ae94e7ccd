//! 交换链图像生命周期
//!
//! 呈现引擎决定下一张可写的图像，顺序不一定与帧槽位的轮转一致。
//! 因此每张图像单独记录最近一次写入它的提交的 fence 值：
//! 获取到图像后，必须等待该值完成才能再次写入。

use super::sync::FenceValue;

/// 交换链图像状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// 没有未完成的提交引用该图像
    Free,
    /// 最近一次引用该图像的提交
    InFlight(FenceValue),
}

/// 交换链图像跟踪
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    states: Vec<ImageState>,
}

impl SwapchainImages {
    pub fn new(image_count: u32) -> Self {
        Self {
            states: vec![ImageState::Free; image_count as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, index: u32) -> Option<ImageState> {
        self.states.get(index as usize).copied()
    }

    /// 再次写入该图像之前需要等待的 fence 值
    pub fn wait_target(&self, index: u32) -> Option<FenceValue> {
        match self.state(index) {
            Some(ImageState::InFlight(value)) => Some(value),
            _ => None,
        }
    }

    /// 提交时记录写入该图像的 fence 值
    pub fn mark_in_flight(&mut self, index: u32, value: FenceValue) {
        if let Some(state) = self.states.get_mut(index as usize) {
            *state = ImageState::InFlight(value);
        }
    }

    /// 把已完成的图像标记为空闲
    pub fn retire(&mut self, completed: FenceValue) {
        for state in &mut self.states {
            if matches!(state, ImageState::InFlight(value) if *value <= completed) {
                *state = ImageState::Free;
            }
        }
    }

    /// 交换链重建后重新开始跟踪
    pub fn reset(&mut self, image_count: u32) {
        self.states = vec![ImageState::Free; image_count as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tracking() {
        let mut images = SwapchainImages::new(3);
        assert_eq!(images.len(), 3);
        assert_eq!(images.wait_target(0), None);

        images.mark_in_flight(2, FenceValue::new(1));
        images.mark_in_flight(0, FenceValue::new(2));
        assert_eq!(images.wait_target(2), Some(FenceValue::new(1)));
        assert_eq!(images.wait_target(0), Some(FenceValue::new(2)));

        // 再次写入时以最新的提交为准
        images.mark_in_flight(2, FenceValue::new(3));
        assert_eq!(images.wait_target(2), Some(FenceValue::new(3)));

        images.retire(FenceValue::new(2));
        assert_eq!(images.state(0), Some(ImageState::Free));
        assert_eq!(images.state(2), Some(ImageState::InFlight(FenceValue::new(3))));
    }

    #[test]
    fn test_reset_after_rebuild() {
        let mut images = SwapchainImages::new(2);
        images.mark_in_flight(1, FenceValue::new(4));
        images.reset(4);
        assert_eq!(images.len(), 4);
        assert!((0..4).all(|i| images.wait_target(i).is_none()));
        assert_eq!(images.state(4), None);
    }
}
