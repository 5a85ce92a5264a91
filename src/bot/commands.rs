use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Доступные команды:")]
pub enum Command {
  /// Главное меню
  Start,
  /// Список команд
  Help,
  /// Записаться на выезд в приют
  GoShelter,
  /// Выбрать приют из списка
  ChooseShelter,
  /// Даты выездов в выбранный приют
  TripDates,
  /// Мастер-классы по изготовлению будок
  Masterclass,
  /// Сделать пожертвование
  Donation,
  /// Пожертвовать в конкретный приют
  DonationShelterList,
  #[command(hide)]
  RereadShelters,
  #[command(hide)]
  RereadAppConfig,
  #[command(hide)]
  UpdateGoogleAuth,
  #[command(hide)]
  ClearCache,
}

impl Command {
  pub fn is_admin_only(&self) -> bool {
    matches!(
      self,
      Command::RereadShelters | Command::RereadAppConfig | Command::UpdateGoogleAuth | Command::ClearCache
    )
  }
}
