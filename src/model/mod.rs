pub mod estimate;
pub mod project;
pub mod work_item;
