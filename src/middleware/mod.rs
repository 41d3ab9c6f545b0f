pub mod allow_list;
