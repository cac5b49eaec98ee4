use crate::handles::ResourceKind;

/// 注册表通知播放引擎的接口
///
/// 默认实现什么都不做，引擎只需要覆盖关心的事件。
pub trait EngineHooks {
    /// 资源加载完成，load queue 中的命令已经应用
    fn resource_loaded(&mut self, kind: ResourceKind, id: u32) {
        let _ = (kind, id);
    }

    /// persistent 栈弹出了一个音色库，引擎应丢弃由它派生的工作内存
    fn discard_font(&mut self, font_id: u32) {
        let _ = font_id;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;
impl EngineHooks for NullHooks {}

/// 记录收到的事件，供测试与 replay 工具检查
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingHooks {
    pub loaded: Vec<(ResourceKind, u32)>,
    pub discarded_fonts: Vec<u32>,
}
impl EngineHooks for RecordingHooks {
    fn resource_loaded(&mut self, kind: ResourceKind, id: u32) {
        self.loaded.push((kind, id));
    }

    fn discard_font(&mut self, font_id: u32) {
        self.discarded_fonts.push(font_id);
    }
}
impl<T: EngineHooks + ?Sized> EngineHooks for std::rc::Rc<std::cell::RefCell<T>> {
    fn resource_loaded(&mut self, kind: ResourceKind, id: u32) {
        self.borrow_mut().resource_loaded(kind, id);
    }

    fn discard_font(&mut self, font_id: u32) {
        self.borrow_mut().discard_font(font_id);
    }
}
