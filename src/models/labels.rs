//! 类别映射 (模型类别ID → 配置类别)

use serde::{Deserialize, Serialize};

use crate::detection::ObjectClass;

/// COCO 80 类名称
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// 类别ID的解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMap {
    /// 类别ID直接索引配置的 objectClasses
    #[default]
    Positional,
    /// 类别ID先映射为 COCO 名称,再按 objectClasses 过滤
    Coco,
}

#[derive(Debug, Clone)]
pub struct ClassMapper {
    map: LabelMap,
    classes: Vec<ObjectClass>,
}

impl ClassMapper {
    pub fn new(map: LabelMap, classes: &[String]) -> Self {
        Self {
            map,
            classes: classes.iter().map(|c| ObjectClass::new(c)).collect(),
        }
    }

    /// 不在允许列表中的类别返回 None
    pub fn resolve(&self, class_id: i64) -> Option<ObjectClass> {
        let idx = usize::try_from(class_id).ok()?;
        match self.map {
            LabelMap::Positional => self.classes.get(idx).cloned(),
            LabelMap::Coco => {
                let name = COCO_CLASSES.get(idx)?;
                self.classes.iter().find(|c| c.as_str() == *name).cloned()
            }
        }
    }

    pub fn classes(&self) -> &[ObjectClass] {
        &self.classes
    }
}
